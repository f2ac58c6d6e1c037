use std::sync::Arc;

use color_eyre::Report;
use tracing::{debug, info, warn};

use forpost::config;
use forpost::flag::FlagPool;
use forpost::gateway::Gateway;
use forpost::intercept::{Chain, CheckFlagInterceptor, LoginInterceptor, RegisterInterceptor};
use forpost::store::{Team, TeamStore};

#[tokio::main]
async fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let args = argh::from_env::<config::Args>();
    let config = args.get_config()?;
    args.setup_logging()?;

    info!("starting gateway for event {:?}", config.event.title);

    let pool = Arc::new(FlagPool::new());
    for entry in &config.event.flags {
        pool.add_flag(entry.to_flag_config()?, entry.points)?;
    }
    info!("{} flags in pool", config.event.flags.len());

    // persistence integration point: committed team mutations surface here
    let store = Arc::new(TeamStore::with_hooks(vec![Box::new(|team: &Team| {
        match serde_json::to_string(&team.snapshot()) {
            Ok(snapshot) => debug!("team state: {snapshot}"),
            Err(err) => warn!("failed to serialize team snapshot: {err}"),
        }
    })]));

    let mut register =
        RegisterInterceptor::new(Arc::clone(&store)).with_challenges(pool.challenges());
    if let Some(survey) = &config.event.survey {
        register = register.with_survey(survey.to_extra_fields());
    }

    let chain = Chain::new(vec![
        Box::new(register),
        Box::new(LoginInterceptor::new(Arc::clone(&store))),
        Box::new(CheckFlagInterceptor::new(store, pool)),
    ]);

    let addr = config.gateway.listen.parse()?;
    Gateway::new(chain, &config.gateway.upstream)?.run(addr).await
}
