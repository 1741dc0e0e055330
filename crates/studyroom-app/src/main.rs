mod cli;
mod commands;
mod settings;

use std::path::Path;
use std::process::ExitCode;

use studyroom_common::StudyroomError;
use studyroom_config::StudyroomConfig;
use studyroom_live::LiveError;
use tracing_subscriber::EnvFilter;

use cli::Command;

fn session_error(e: LiveError) -> StudyroomError {
    StudyroomError::Session(e.to_string())
}

/// Load environment variables from a .env file (KEY=VALUE lines).
fn load_dotenv() {
    let manifest_dir = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let candidates = [
        // Workspace root, two levels up from crates/studyroom-app/
        manifest_dir.join("..").join("..").join(".env"),
        std::path::PathBuf::from(".env"),
    ];

    for path in &candidates {
        if let Ok(contents) = std::fs::read_to_string(path) {
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    let key = key.trim();
                    let value = value.trim().trim_matches('"').trim_matches('\'');
                    if std::env::var(key).is_err() {
                        std::env::set_var(key, value);
                    }
                }
            }
            return;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    load_dotenv();

    let args = cli::parse();

    // Config is read before logging so `[logging] level` can apply; the
    // outcome is reported once the subscriber is up.
    let loaded = match args.config.as_deref() {
        Some(path) => studyroom_config::load_config_from(Path::new(path)),
        None => studyroom_config::load_config(),
    };
    let (config, load_error) = match loaded {
        Ok(config) => (config, None),
        Err(e) => (StudyroomConfig::default(), Some(e)),
    };

    let log_directive = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let filter = match log_directive.parse() {
        Ok(directive) => EnvFilter::from_default_env().add_directive(directive),
        Err(_) => EnvFilter::from_default_env(),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("studyroom v{} starting...", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &args.config {
        tracing::info!("Using config override: {path}");
    }
    let result = match load_error {
        // An explicit --config that cannot be read is fatal.
        Some(e) if args.config.is_some() => Err(StudyroomError::Config(e)),
        Some(e) => {
            tracing::warn!("Config load failed, using defaults: {e}");
            run(args.command, &config).await
        }
        None => run(args.command, &config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: &StudyroomConfig) -> studyroom_common::Result<()> {
    match command {
        Command::Join {
            room,
            user_id,
            name,
        } => commands::join::run(config, &room, user_id, &name)
            .await
            .map_err(session_error),
        Command::Demo { peers, room } => commands::demo::run(config, peers, &room)
            .await
            .map_err(session_error),
        Command::Config => {
            println!("{}", studyroom_config::config_to_json(config));
            Ok(())
        }
    }
}
