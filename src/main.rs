use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{debug, error, info};
use warp::Filter;

mod args;
use args::Args;

mod auth;
mod backend;
mod cohort;
mod identity;
#[cfg(test)]
mod mock;
mod routes;
mod time;
mod token;
mod upload;
mod user;

use backend::Backend;
use cohort::Cohort;
use identity::{Google, IdentityProvider};
use token::Keys;

const PURGE_INTERVAL: Duration = Duration::from_secs(10 * 60);

#[tokio::main]
async fn main() -> ExitCode {
    pretty_env_logger::init();

    let args = Args::parse();
    if let Err(e) = args.validate() {
        error!("invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    let addr = match args.addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!("couldn't parse address: {e}");
            return ExitCode::FAILURE;
        }
    };

    let backend = match Backend::new(args.data_dir()).await {
        Ok(backend) => backend,
        Err(e) => {
            error!("couldn't open database in {}: {e}", args.data_dir().display());
            return ExitCode::FAILURE;
        }
    };

    let google = match Google::new(args.google_client_id().to_string()) {
        Ok(google) => google,
        Err(e) => {
            error!("couldn't create http client: {e}");
            return ExitCode::FAILURE;
        }
    };

    let superusers = args.superuser_emails();
    info!("{} superuser email(s) configured", superusers.len());

    let cohort = Arc::new(Cohort::new(
        backend,
        Keys::new(args.jwt_secret()),
        IdentityProvider::Google(google),
        superusers,
    ));

    tokio::spawn({
        let cohort = Arc::clone(&cohort);
        async move {
            let mut interval = tokio::time::interval(PURGE_INTERVAL);
            loop {
                interval.tick().await;
                if let Ok(n) = cohort.purge_sessions().await {
                    debug!("session purge: {n} removed");
                }
            }
        }
    });

    let cors = warp::cors()
        .allow_origin(args.cors_origin())
        .allow_credentials(true)
        .allow_methods(["GET", "POST", "OPTIONS"])
        .allow_header("content-type");

    let routes = routes::routes(&cohort, args.secure())
        .with(cors)
        .with(warp::log("cohort"));

    info!("listening on {addr} (secure cookies: {})", args.secure());
    warp::serve(routes).run(addr).await;

    ExitCode::SUCCESS
}
