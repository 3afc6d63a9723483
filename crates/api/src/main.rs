// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{convert::Infallible, error::Error, net::IpAddr, time::Instant};

use cvctf_api::{
    config::Config,
    db::{self, models::NewUser, models::UserRole},
    rest::{self, BaseContext},
    security::password::hash_password,
};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn is_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => ipv4.is_private() || ipv4.is_loopback(),
        IpAddr::V6(ipv6) => ipv6.is_unique_local() || ipv6.is_loopback(),
    }
}

/// Behind a reverse proxy on a private network, the first public address in
/// `X-Forwarded-For` is the client.
fn client_ip<B>(remote_ip: IpAddr, req: &hyper::Request<B>) -> IpAddr {
    if !is_private(&remote_ip) {
        return remote_ip;
    }
    req.headers()
        .get("x-forwarded-for")
        .and_then(|xff| xff.to_str().ok())
        .and_then(|xff| {
            xff.split(',')
                .filter_map(|ip_str| ip_str.trim().parse::<IpAddr>().ok())
                .find(|ip| !is_private(ip))
        })
        .unwrap_or(remote_ip)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    let store = db::open_store(config.database_url.as_deref()).await?;

    match &config.admin {
        Some(admin) => {
            let user = store
                .ensure_admin(NewUser {
                    name: "Administrator".to_string(),
                    email: admin.email.clone(),
                    password_hash: hash_password(&admin.password)
                        .map_err(|e| format!("Failed to hash admin password: {e}"))?,
                    role: UserRole::Admin,
                })
                .await?;
            tracing::info!(user_id = user.id, email = %user.email, "Seeded administrator account");
        }
        None => tracing::warn!(
            "ADMIN_EMAIL and ADMIN_PASSWORD are not set; only existing admin accounts can manage the platform"
        ),
    }

    let listener = TcpListener::bind(config.listen_addr).await?;
    let ctx = BaseContext::new(store, config);

    let limiter = ctx.limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(limiter.window());
        loop {
            interval.tick().await;
            limiter.prune(Instant::now());
        }
    });

    tracing::info!("Listening on http://{}", listener.local_addr()?);
    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!("Failed to accept connection: {e}");
                continue;
            }
        };

        let io = TokioIo::new(stream);
        let ctx = ctx.clone();

        tokio::spawn(async move {
            if let Err(e) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                .serve_connection(
                    io,
                    service_fn(move |req| {
                        let ctx = ctx.clone();
                        let remote_ip = client_ip(remote_addr.ip(), &req);
                        async move { Ok::<_, Infallible>(rest::serve(ctx, remote_ip, req).await) }
                    }),
                )
                .await
            {
                tracing::error!("Error serving connection: {e}");
            }
        });
    }
}
