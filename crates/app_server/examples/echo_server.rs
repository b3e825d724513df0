use std::net::SocketAddr;

use carbon_app_server::{
    Env, HttpServerError, Response, Server, ServerConfig, StatusCode, app_fn,
    http::header::{HeaderMap, HeaderName},
};

#[tokio::main]
async fn main() -> Result<(), HttpServerError> {
    env_logger::init();

    let app = app_fn(|mut env: Env| async move {
        if let Some(hints) = env.early_hints() {
            let mut links = HeaderMap::new();
            links.append(HeaderName::LINK, "</style.css>; rel=preload; as=style");
            hints.send(&links).await;
        }

        let body = env.input.read_to_end();
        Ok(Response::builder(StatusCode::OK)
            .header(HeaderName::CONTENT_TYPE, "text/plain")
            .chunk(format!(
                "{} {} from {} via {}\n",
                env.method, env.request_uri, env.remote_addr, env.url_scheme
            ))
            .chunk(body)
            .build())
    });

    let addr: SocketAddr = ([127, 0, 0, 1], 8080).into();
    let handle = Server::new(app)
        .config(
            ServerConfig::default()
                .with_early_hints(true)
                .with_backlog(128),
        )
        .bind(addr)?;

    tokio::signal::ctrl_c().await?;
    handle.stop(true).await
}
