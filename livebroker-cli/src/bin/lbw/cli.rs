use clap::{Arg, ArgAction, Command};

fn method_args(cmd: Command) -> Command {
    cmd.arg(Arg::new("service").required(true).help("The service name."))
        .arg(Arg::new("method").required(true).help("The method name."))
        .arg(
            Arg::new("args")
                .num_args(0..)
                .help("Arguments, one JSON value each. Bare words are passed as strings."),
        )
}

pub fn cli() -> Command {
    Command::new("lbw")
        .about("Calls and watches live RPC methods")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .default_value("broker.toml")
                .help("Path to the broker configuration."),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Log push traffic and reinvocations."),
        )
        .subcommand_required(true)
        .subcommand(method_args(
            Command::new("call").about("Call a method once and print the result."),
        ))
        .subcommand(method_args(
            Command::new("watch")
                .about("Subscribe to a method and print every result until interrupted."),
        ))
        .subcommand(
            Command::new("decode")
                .about("Decode push messages read from stdin, one per line.")
                .arg(
                    Arg::new("topic")
                        .long("topic")
                        .default_value(livebroker::ENTITIES_TOPIC)
                        .help("The topic the messages arrived on."),
                ),
        )
}
