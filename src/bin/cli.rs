//! mcroute CLI Client
//!
//! Command-line interface for running single operations against a pool of
//! cache nodes.

use clap::{Parser, Subcommand};
use mcroute::client::StoreOptions;
use mcroute::routing::{Distribution, HashAlgorithm, RedistributionKind};
use mcroute::{Client, Config};
use tracing_subscriber::{fmt, EnvFilter};

/// mcroute CLI
#[derive(Parser, Debug)]
#[command(name = "mcroute-cli")]
#[command(about = "Run cache operations against a pool of memcached nodes")]
#[command(version)]
struct Args {
    /// Server addresses (host[:port]), comma separated
    #[arg(short, long, value_delimiter = ',', default_value = "127.0.0.1:11211")]
    servers: Vec<String>,

    /// Namespace prefix added to every key
    #[arg(short, long, default_value = "")]
    prefix: String,

    /// Use the legacy text protocol
    #[arg(long)]
    text: bool,

    /// Extra copies of each key
    #[arg(short, long, default_value = "0")]
    replicas: usize,

    /// Key hash algorithm
    #[arg(long, default_value = "default")]
    hash: HashAlgorithm,

    /// Key distribution (modula, consistent)
    #[arg(long, default_value = "modula")]
    distribution: Distribution,

    /// Strategy for keys whose server is down (rehash, next-server)
    #[arg(long, default_value = "rehash")]
    redistribution: RedistributionKind,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,

        /// Expiration in seconds (0 = never)
        #[arg(short, long, default_value = "0")]
        expiration: u32,

        /// Opaque client flags
        #[arg(short, long, default_value = "0")]
        flags: u32,
    },

    /// Delete a key
    Delete {
        /// The key to delete
        key: String,
    },

    /// Update a key's expiration (binary protocol only)
    Touch {
        /// The key to touch
        key: String,

        /// New expiration in seconds
        expiration: u32,
    },

    /// Increment a counter
    Incr {
        key: String,

        #[arg(default_value = "1")]
        delta: u64,
    },

    /// Decrement a counter
    Decr {
        key: String,

        #[arg(default_value = "1")]
        delta: u64,
    },

    /// Invalidate every item on every server
    Flush {
        #[arg(short, long, default_value = "0")]
        expiration: u32,
    },

    /// Print each server's version
    Version,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,mcroute=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match Config::builder()
        .servers(&args.servers)
        .prefix_key(args.prefix.as_bytes())
        .binary_protocol(!args.text)
        .replicas(args.replicas)
        .hash(args.hash)
        .distribution(args.distribution)
        .redistribution(args.redistribution)
        .build()
    {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    let mut client = Client::new(config);
    if let Err(e) = run(&mut client, args.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(client: &mut Client, command: Commands) -> mcroute::Result<()> {
    match command {
        Commands::Get { key } => match client.get(key.as_bytes())? {
            Some(item) => println!("{}", String::from_utf8_lossy(&item.value)),
            None => println!("(nil)"),
        },
        Commands::Set {
            key,
            value,
            expiration,
            flags,
        } => {
            let options = StoreOptions {
                expiration,
                flags,
                cas: 0,
            };
            client.set(key.as_bytes(), value.as_bytes(), options)?;
            println!("STORED");
        }
        Commands::Delete { key } => {
            let deleted = client.delete(key.as_bytes())?;
            println!("{}", if deleted { "DELETED" } else { "NOT_FOUND" });
        }
        Commands::Touch { key, expiration } => {
            let touched = client.touch(key.as_bytes(), expiration)?;
            println!("{}", if touched { "TOUCHED" } else { "NOT_FOUND" });
        }
        Commands::Incr { key, delta } => print_counter(client.increment(key.as_bytes(), delta)?),
        Commands::Decr { key, delta } => print_counter(client.decrement(key.as_bytes(), delta)?),
        Commands::Flush { expiration } => {
            client.flush_all(expiration)?;
            println!("OK");
        }
        Commands::Version => {
            for (addr, version) in client.version() {
                match version {
                    Ok(v) => println!("{}: {}", addr, v),
                    Err(e) => println!("{}: error: {}", addr, e),
                }
            }
        }
    }
    Ok(())
}

fn print_counter(value: Option<u64>) {
    match value {
        Some(v) => println!("{}", v),
        None => println!("NOT_FOUND"),
    }
}
