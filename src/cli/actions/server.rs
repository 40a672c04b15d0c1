use crate::{
    api,
    api::handlers::auth::state::AppConfig,
    cli::actions::Action,
};
use anyhow::Result;
use url::Url;

/// Handle the server action
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Server {
            port,
            dsn,
            frontend_url,
        } => {
            // Fail fast on a malformed DSN or frontend URL before touching the database.
            Url::parse(&dsn)?;
            Url::parse(&frontend_url)?;

            let config = AppConfig::new(frontend_url);

            api::new(port, dsn, config).await?;
        }
    }

    Ok(())
}
