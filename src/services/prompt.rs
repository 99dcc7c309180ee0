use crate::models::KNOWN_CATEGORIES;

const PROMPT_HEADER: &str = "You are a wellness and peptide research assistant. Carefully examine the person in this photo.\n\
\n\
1. ANALYSIS:\n\
- List the main visually observable issues (skin, physique, posture, signs of fatigue or inflammation).\n\
- List the positives the person has already achieved.\n\
- Keep each item short: a title plus one or two sentences of detail.\n\
\n\
2. PEPTIDE RECOMMENDATIONS:\n\
- Recommend between 4 and 6 peptides that address the issues you found.\n\
- For each peptide give: name, category, description, benefits (a list of short strings) and usage.\n";

const PROMPT_SHAPE: &str = "\n\
3. DISCLAIMER:\n\
- Add a short disclaimer that this is not medical advice.\n\
\n\
RESPONSE FORMAT (USE EXACTLY THIS JSON SHAPE):\n\
{\n\
  \"analysis\": {\n\
    \"mainIssues\": [{\"title\": \"...\", \"detail\": \"...\"}],\n\
    \"alreadyAchieved\": [{\"title\": \"...\", \"detail\": \"...\"}]\n\
  },\n\
  \"peptides\": [\n\
    {\n\
      \"name\": \"...\",\n\
      \"category\": \"...\",\n\
      \"description\": \"...\",\n\
      \"benefits\": [\"...\", \"...\"],\n\
      \"usage\": \"...\"\n\
    }\n\
  ],\n\
  \"disclaimer\": \"...\"\n\
}\n\
\n\
RULES:\n\
- Respond with the JSON object ONLY. No text before or after it, no markdown.\n\
- Do NOT use trailing commas.\n\
- Do NOT include comments of any kind.\n\
- Use double quotes for every key and string value.\n\
- Always return at least 4 entries in \"peptides\".";

/// The instruction text sent alongside every image. Static and deterministic.
pub fn analysis_prompt() -> String {
    format!(
        "{}- category must be one of: {}.\n{}",
        PROMPT_HEADER,
        KNOWN_CATEGORIES.join(", "),
        PROMPT_SHAPE
    )
}
