use std::time::Instant;

use anyhow::{anyhow, Context};
use tokio::sync::oneshot;
use tracing::info;

use crate::config::PollerConfig;
use crate::core::{
    build_result_query, categorize_services, Client, ExecutionService, OutputSpec, Poller,
};
use crate::server::{forecast_service, Server};

const FORECAST_INPUT: &str = r#"from(bucket: "ds-bucket") |> range(start: -15y) |> filter(fn: (r) => r["_measurement"] == "historical") |> filter(fn: (r) => r["_field"] == "value")"#;

/// Forecast round trip: pick a service, make sure an instance exists, submit,
/// wait for completion and print the query that reads the results back.
/// Without `RAGNAROK_URL` it runs against an in-process service.
pub async fn run() -> anyhow::Result<()> {
    let mut config = PollerConfig::from_env()?;
    if std::env::var("RAGNAROK_URL").is_err() {
        let server = Server::new().with_service(forecast_service()).await;
        let addr = server.spawn().await?;
        config.service_url = format!("http://{addr}");
    }

    let poller = Poller::new(Client::new(config.service_url.clone()));

    let services = poller.service().list_services().await?;
    for category in categorize_services(&services) {
        let names: Vec<_> = category.services.iter().map(|s| s.name.as_str()).collect();
        info!(category = %category.name, services = ?names, "available services");
    }

    let (service, action) = services
        .iter()
        .find_map(|s| s.action("Forecast").map(|a| (s, a)))
        .ok_or_else(|| anyhow!("no service offers a Forecast action"))?;

    let instance = poller
        .ensure_instance(&service.id, &service.name)
        .await
        .context("could not resolve an instance")?;

    let output: OutputSpec = OutputSpec::from_action(action);
    let activity_id = poller
        .submit_operation(instance.id.clone(), &action.name, FORECAST_INPUT, output)
        .await?;

    let start = Instant::now();
    let (tx, rx) = oneshot::channel();
    let _handle = poller.await_completion(activity_id, config.poll_options.clone(), move |res| {
        let _ = tx.send(res);
    });
    let activity = rx.await.context("poll task ended without reporting")??;

    info!(
        activity_id = %activity.activity_id,
        status = %activity.status,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "forecast finished"
    );

    match build_result_query(&activity, Some(action)) {
        Some(query) => println!("{query}"),
        None => info!("forecast produced no queryable output"),
    }
    Ok(())
}
