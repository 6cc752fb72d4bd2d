//! # Server
//!
//! Thread-per-connection TCP front end. Each connection gets its own
//! [`Session`](crate::db::Session), so its transaction state lives and dies
//! with the socket; statement errors flow back as flag-1 packets and the
//! connection keeps serving.

pub mod transport;

use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use eyre::{Result, WrapErr};

use crate::db::Database;
use transport::{Package, Transporter};

pub struct Server {
    db: Arc<Database>,
}

impl Server {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Accept loop; runs until the listener fails. Each connection is
    /// served on its own OS thread.
    pub fn serve(&self, listener: TcpListener) -> Result<()> {
        log::info!(
            "serving on {}",
            listener.local_addr().map(|a| a.to_string()).unwrap_or_default()
        );

        for stream in listener.incoming() {
            let stream = stream.wrap_err("failed to accept connection")?;
            let db = self.db.clone();
            thread::spawn(move || {
                let peer = stream
                    .peer_addr()
                    .map(|a| a.to_string())
                    .unwrap_or_else(|_| "unknown".into());
                log::info!("connection from {}", peer);
                if let Err(e) = handle_connection(&db, stream) {
                    log::warn!("connection {} ended with error: {:#}", peer, e);
                } else {
                    log::info!("connection {} closed", peer);
                }
            });
        }
        Ok(())
    }
}

fn handle_connection(db: &Database, stream: TcpStream) -> Result<()> {
    let reader = stream.try_clone().wrap_err("failed to clone stream")?;
    let mut transporter = Transporter::new(reader, stream);
    let mut session = db.session();

    while let Some(package) = transporter.receive()? {
        let reply = match package {
            Package::Data(request) => {
                let statement = String::from_utf8_lossy(&request);
                match session.execute(&statement) {
                    Ok(result) => Package::Data(result.into_bytes()),
                    Err(e) => Package::Err(format!("{:#}", e)),
                }
            }
            Package::Err(message) => Package::Err(format!("unexpected error packet: {}", message)),
        };
        transporter.send(&reply)?;
    }
    Ok(())
}
