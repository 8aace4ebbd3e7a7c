use clap::{Parser, Subcommand};
use migration::{Migrator, MigratorTrait};
use sea_orm::Database;

use whitefly_detect::config::Config;
use whitefly_detect::logging::init_logging;
use whitefly_detect::routes::{auth::create_user, create_routes};
use whitefly_detect::services::annotations::{edit_annotation, BoxPatch};
use whitefly_detect::services::storage::MediaStorage;
use whitefly_detect::state::AppState;

#[derive(Parser)]
#[command(name = "whitefly-detect", version, about = "Whitefly detection upload service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run pending migrations and serve the HTTP API (default)
    Serve,
    /// Create a user; the password is prompted for
    CreateUser {
        username: String,
        #[arg(long, default_value = "")]
        email: String,
    },
    /// Correct the box of one stored annotation
    EditAnnotation {
        #[arg(long)]
        result_id: i32,
        #[arg(long)]
        annotation_id: u32,
        #[arg(long)]
        xmin: Option<i32>,
        #[arg(long)]
        ymin: Option<i32>,
        #[arg(long)]
        xmax: Option<i32>,
        #[arg(long)]
        ymax: Option<i32>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_logging(&config.log_level);

    let db = Database::connect(&config.database_url).await?;
    Migrator::up(&db, None).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            MediaStorage::new(&config.media_root).ensure_dirs()?;
            let bind_addr = config.bind_addr.clone();
            let app = create_routes(AppState::new(db, config)?);

            let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
            tracing::info!("Listening on {}", listener.local_addr()?);
            axum::serve(listener, app).await?;
        }
        Command::CreateUser { username, email } => {
            let password = rpassword::prompt_password("Password: ")?;
            let confirm = rpassword::prompt_password("Password (again): ")?;
            if password != confirm {
                return Err("passwords do not match".into());
            }
            let user = create_user(&db, &username, &email, &password)
                .await
                .map_err(|e| format!("could not create user: {:?}", e))?;
            println!("User '{}' created with id {}", user.username, user.id);
        }
        Command::EditAnnotation { result_id, annotation_id, xmin, ymin, xmax, ymax } => {
            let patch = BoxPatch { xmin, ymin, xmax, ymax };
            let (before, after) = edit_annotation(&db, result_id, annotation_id, patch).await?;
            println!("previous annotation: {}", serde_json::to_string(&before)?);
            println!("updated annotation:  {}", serde_json::to_string(&after)?);
            println!("Annotation with ID {} edited successfully in Result ID {}.", annotation_id, result_id);
        }
    }

    Ok(())
}
