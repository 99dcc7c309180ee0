use axum::Router;

/// Serves `app` on an ephemeral local port and returns its base URL.
pub async fn spawn_stub(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind stub server");
    let addr = listener.local_addr().expect("Stub server has no address");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Stub server crashed");
    });

    format!("http://{}", addr)
}
