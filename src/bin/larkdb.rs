//! # LarkDB Server Entry Point
//!
//! ```bash
//! # Initialize the database files and exit
//! larkdb -create /path/to/db
//!
//! # Open an existing database and serve it
//! larkdb -open /path/to/db
//!
//! # Tune the page-cache budget (KB | MB | GB suffix)
//! larkdb -open /path/to/db -mem 128MB
//!
//! # Serve on a different port
//! larkdb -open /path/to/db -port 9999
//! ```

use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;

use eyre::{bail, Result, WrapErr};
use larkdb::config::{DEFAULT_MEM, DEFAULT_PORT};
use larkdb::db::Database;
use larkdb::error::EngineError;
use larkdb::server::Server;

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

enum Mode {
    Create,
    Open,
}

fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let mut mode: Option<Mode> = None;
    let mut path: Option<PathBuf> = None;
    let mut mem = DEFAULT_MEM;
    let mut port = DEFAULT_PORT;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-create" => {
                mode = Some(Mode::Create);
                path = Some(PathBuf::from(take_value(&args, &mut i)?));
            }
            "-open" => {
                mode = Some(Mode::Open);
                path = Some(PathBuf::from(take_value(&args, &mut i)?));
            }
            "-mem" => {
                mem = parse_mem(&take_value(&args, &mut i)?)?;
            }
            "-port" => {
                port = take_value(&args, &mut i)?
                    .parse()
                    .wrap_err("invalid port")?;
            }
            "-h" | "--help" => {
                print_usage();
                return Ok(());
            }
            other => bail!("unknown option: {}", other),
        }
        i += 1;
    }

    let (Some(mode), Some(path)) = (mode, path) else {
        print_usage();
        return Ok(());
    };

    match mode {
        Mode::Create => {
            let db = Database::create(&path)?;
            db.close()?;
            println!("created database at {}", path.display());
            Ok(())
        }
        Mode::Open => {
            let db = Arc::new(Database::open(&path, mem)?);
            let listener = TcpListener::bind(("0.0.0.0", port))
                .wrap_err_with(|| format!("failed to bind port {}", port))?;
            Server::new(db).serve(listener)
        }
    }
}

fn take_value(args: &[String], i: &mut usize) -> Result<String> {
    *i += 1;
    args.get(*i)
        .cloned()
        .ok_or_else(|| eyre::eyre!("option {} needs a value", args[*i - 1]))
}

fn parse_mem(arg: &str) -> Result<usize> {
    if arg.len() < 3 {
        bail!(EngineError::InvalidMem);
    }
    let (number, unit) = arg.split_at(arg.len() - 2);
    let number: usize = number.parse().map_err(|_| EngineError::InvalidMem)?;
    let factor = match unit.to_ascii_uppercase().as_str() {
        "KB" => 1 << 10,
        "MB" => 1 << 20,
        "GB" => 1 << 30,
        _ => bail!(EngineError::InvalidMem),
    };
    Ok(number * factor)
}

fn print_usage() {
    println!("Usage: larkdb (-create|-open) DBPath [-mem 64MB] [-port {}]", DEFAULT_PORT);
}
