use std::env;

use myclimate::{ClimateClient, Config, Event, Field, MessageLogMode};

/// Run with: cargo run --example monitor -- [config.json] [--log messages.ndjson] [--set field=value]...
#[tokio::main]
async fn main() -> myclimate::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let config = match args.first().filter(|a| !a.starts_with("--")) {
        Some(path) => Config::from_json_file(path)?,
        None => Config::default(),
    };

    let mut builder = ClimateClient::builder(config.clone()).on_event(|event| match event {
        Event::StatusChanged(status) => println!("status: {status}"),
        Event::FieldChanged { field, value } => println!("{field}: {value}"),
    });
    if let Some(pos) = args.iter().position(|a| a == "--log")
        && let Some(path) = args.get(pos + 1)
    {
        builder = builder.message_log(MessageLogMode::Diffed, path.clone());
    }

    println!("Looking for controller at {}...", config.remote());
    let client = builder.spawn().await?;
    client.run_cycle_now()?;

    for pair in args.windows(2).filter(|w| w[0] == "--set") {
        let Some((name, value)) = pair[1].split_once('=') else {
            eprintln!("ignoring {}: expected field=value", pair[1]);
            continue;
        };
        match Field::from_wire_str(name) {
            Some(field) => client.submit(field, value).await?,
            None => eprintln!("unknown field: {name}"),
        }
    }

    tokio::signal::ctrl_c().await?;
    println!("Disconnecting...");
    client.shutdown().await
}
