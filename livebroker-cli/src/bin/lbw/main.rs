use std::io::BufRead;

use clap::ArgMatches;
use futures::StreamExt;
use livebroker::{
    Broker, BrokerBuilder, LoadedConfig, TopicLayout, Value, config::DEFAULT_TYPE_FIELD,
    dispatch,
};

pub mod cli;
pub mod logger;

#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        log::error!($($arg)*);
        std::process::exit(1)
    }};
}

fn arg_values(m: &ArgMatches) -> Vec<Value> {
    m.get_many::<String>("args")
        .into_iter()
        .flatten()
        .map(|s| serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())))
        .collect()
}

fn method_id<'m>(m: &'m ArgMatches) -> (&'m str, &'m str) {
    let service = m.get_one::<String>("service").expect("required argument");
    let method = m.get_one::<String>("method").expect("required argument");
    (service, method)
}

fn print(v: &Value) {
    match serde_json::to_string_pretty(v) {
        Ok(s) => println!("{s}"),
        Err(e) => log::error!("could not print result: {e}"),
    }
}

fn broker(config: &str) -> Broker {
    let loaded = LoadedConfig::load(config)
        .unwrap_or_else(|e| crate::fatal!("could not load {config}: {e}"));
    BrokerBuilder::from_loaded(loaded)
        .build()
        .unwrap_or_else(|e| crate::fatal!("could not create broker: {e}"))
}

async fn call(broker: Broker, m: &ArgMatches) {
    let (service, method) = method_id(m);
    match broker.call(service, method, &arg_values(m)).await {
        Ok(v) => print(&v),
        Err(e) => crate::fatal!("{e}"),
    }
}

async fn watch(broker: Broker, m: &ArgMatches) {
    let (service, method) = method_id(m);
    if !broker.config().is_real_time() {
        log::warn!("broker is not in real-time mode, {service}.{method} will run once");
    }
    let mut results = broker.subscribe(service, method, arg_values(m));
    loop {
        tokio::select! {
            next = results.next() => match next {
                Some(Ok(v)) => print(&v),
                Some(Err(e)) => log::warn!("{e}"),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                log::info!("interrupted");
                break;
            }
        }
    }
}

fn decode(config: &str, m: &ArgMatches) {
    let topic = m.get_one::<String>("topic").expect("has default");
    let (layout, type_field) = match LoadedConfig::load(config) {
        Ok(loaded) => (
            loaded.broker.topics(),
            loaded.broker.type_field().to_owned(),
        ),
        Err(e) => {
            log::debug!("using default decoding settings: {e}");
            (TopicLayout::default(), DEFAULT_TYPE_FIELD.to_owned())
        }
    };

    for line in std::io::stdin().lock().lines() {
        let line = line.unwrap_or_else(|e| crate::fatal!("could not read stdin: {e}"));
        match dispatch::decode(topic, &line, layout, &type_field) {
            Some(ev) => {
                let kind = ev.kind.map_or("-", |k| k.as_str());
                println!("{}\t{}\t{}", ev.entity_type, kind, ev.payload.to_json());
            }
            None => log::warn!("no entity type in {line:?}"),
        }
    }
}

#[tokio::main]
async fn main() {
    let matches = cli::cli().get_matches();
    logger::init(matches.get_flag("verbose"));

    let config = matches
        .get_one::<String>("config")
        .expect("has default")
        .as_str();

    match matches.subcommand() {
        Some(("call", m)) => call(broker(config), m).await,
        Some(("watch", m)) => watch(broker(config), m).await,
        Some(("decode", m)) => decode(config, m),
        _ => unreachable!("subcommand is required"),
    }
}
