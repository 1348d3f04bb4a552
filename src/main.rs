mod app;
mod auth;
mod config;
mod error;
mod mailer;
mod referral;
mod state;
mod users;

use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "sawab=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    // A panic anywhere takes the process down after it is logged.
    std::panic::set_hook(Box::new(|info| {
        tracing::error!(panic = %info, "fatal panic");
        std::process::exit(1);
    }));

    let state = AppState::init().await?;
    let app = app::build_app(state);
    app::serve(app).await
}
