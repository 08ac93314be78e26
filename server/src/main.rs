use axum::routing::get;
use axum::Router;
use ctf_server::config::ServerConfig;
use ctf_server::engine::EngineSink;
use ctf_server::game_loop::{run_game_loop, GameCommand};
use ctf_server::ws::{engine_ws_handler, AppState};
use ctf_shared::protocol::GameEvent;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::CorsLayer;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = ServerConfig::from_env();

    // Validate configuration before starting
    if let Err(e) = config.validate() {
        eprintln!("Invalid server configuration: {}", e);
        std::process::exit(1);
    }
    let game_config = match config.load_game_config() {
        Ok(game_config) => game_config,
        Err(e) => {
            eprintln!("Invalid game mode configuration: {}", e);
            std::process::exit(1);
        }
    };

    let (game_tx, game_rx) = mpsc::channel::<GameCommand>(config.command_capacity);
    let (event_tx, mut event_rx) = broadcast::channel::<GameEvent>(64);
    let (sink, engine_rx) = EngineSink::channel();

    // Spawn game loop
    let weak_tx = game_tx.downgrade();
    tokio::spawn(async move {
        run_game_loop(game_rx, weak_tx, event_tx, sink, game_config).await;
    });

    // Match log
    tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event) => tracing::info!("{:?}", event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Event log lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let app = Router::new()
        .route("/engine", get(engine_ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(AppState::new(game_tx, engine_rx));

    tracing::info!("Starting capture-the-flag mode on {}", config.listen_addr);
    println!("Capture-the-flag mode listening on {}", config.listen_addr);

    let listener = match tokio::net::TcpListener::bind(&config.listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Failed to bind {}: {}", config.listen_addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}
