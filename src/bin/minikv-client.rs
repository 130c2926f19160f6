//! A load-generating HTTP client for `minikv`, mirroring
//! `original_source/minikv/client/__init__.py`'s four modes.

use clap::{Parser, ValueEnum};
use rand::Rng;
use tracing_subscriber::EnvFilter;

use minikv::client::RequestSender;
use minikv::config::LogLevel;

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
#[value(rename_all = "kebab-case")]
enum Mode {
    Test,
    Fill,
    CheckValues,
    RandomOps,
}

#[derive(Parser, Debug)]
#[command(name = "minikv-client")]
struct ClientArgs {
    #[arg(value_enum)]
    mode: Mode,

    #[arg(long, default_value = "127.0.0.1:8080")]
    server_address: String,

    #[arg(long, default_value_t = 0)]
    key_offset: i64,

    #[arg(long, default_value_t = 1000)]
    key_range: i64,

    #[arg(long, default_value = "value")]
    value_prefix: String,

    #[arg(long, default_value_t = 50)]
    write_chance: i64,

    #[arg(long, default_value_t = 1000)]
    num_ops: u32,

    #[arg(long, value_enum, default_value = "info")]
    loglevel: LogLevel,
}

fn make_key(idx: i64) -> String {
    format!("key{}", idx)
}

fn main() {
    let args = ClientArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(args.loglevel.as_filter()))
        .init();

    if args.key_range <= 0 {
        eprintln!("ERROR: Key range must be a positive number");
        std::process::exit(1);
    }
    if args.key_offset < 0 {
        eprintln!("ERROR: Key offset cannot be negative");
        std::process::exit(1);
    }
    if !(0..=100).contains(&args.write_chance) {
        eprintln!("ERROR: Write chance must be in [0;100]");
        std::process::exit(1);
    }

    let sender = match RequestSender::new(&args.server_address) {
        Ok(sender) => sender,
        Err(e) => {
            eprintln!("failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    let key_range = args.key_offset..(args.key_offset + args.key_range);
    let make_value = |idx: i64| format!("{}{}", args.value_prefix, idx);

    match args.mode {
        Mode::Test => {
            println!("Running test");
            let mut entries = std::collections::HashMap::new();
            for i in key_range.clone() {
                let key = make_key(i);
                let value = make_value(i);
                sender.write(&key, &value).expect("write failed");
                entries.insert(key, value);
            }
            for i in key_range {
                let key = make_key(i);
                let got = sender.read(&key).expect("read failed");
                assert_eq!(got.as_deref(), entries.get(&key).map(String::as_str));
            }
            println!("Test successful!");
        }
        Mode::Fill => {
            for i in key_range {
                let key = make_key(i);
                let value = make_value(i);
                sender.write(&key, &value).expect("write failed");
            }
        }
        Mode::CheckValues => {
            for i in key_range {
                let key = make_key(i);
                let expected = make_value(i);
                let got = sender.read(&key).expect("read failed");
                if got.as_deref() != Some(expected.as_str()) {
                    println!(
                        "Invalid value for key \"{}\". Expected \"{}\", but got \"{:?}\".",
                        key, expected, got
                    );
                    std::process::exit(1);
                }
            }
        }
        Mode::RandomOps => {
            let mut rng = rand::thread_rng();
            for _ in 0..args.num_ops {
                let index = args.key_offset + rng.gen_range(0..args.key_range);
                let key = make_key(index);
                let roll = rng.gen_range(0..100);
                if roll < args.write_chance {
                    sender.write(&key, "foobar").expect("write failed");
                } else {
                    let expected = make_value(index);
                    let got = sender.read(&key).expect("read failed");
                    if got.as_deref() != Some(expected.as_str()) {
                        println!(
                            "Invalid value for key \"{}\". Expected \"{}\", but got \"{:?}\".",
                            key, expected, got
                        );
                        std::process::exit(1);
                    }
                }
            }
        }
    }
}
