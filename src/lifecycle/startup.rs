//! Listener planning.
//!
//! # Responsibilities
//! - Decide which sockets to bind for the enabled protocols
//! - Adopt pre-bound listeners handed in by the caller
//! - Decide whether the multiplexer is needed
//!
//! # Design Decisions
//! - Fail fast: a bind error is a configuration error and aborts startup
//! - The multiplexer is used only when both protocols run and neither has
//!   its own listener
//! - No address anywhere means a dynamic loopback port, logged at warn

use std::net::SocketAddr;

use tokio::net::TcpListener;

use crate::config::schema::parse_addr;
use crate::config::AppConfig;
use crate::error::Error;
use crate::net::Listener;

/// Address used when nothing is configured.
pub const DYNAMIC_ADDRESS: &str = "127.0.0.1:0";

/// Listeners supplied by the caller instead of configured addresses.
#[derive(Debug, Default)]
pub struct Prebound {
    pub shared: Option<TcpListener>,
    pub http: Option<TcpListener>,
    pub grpc: Option<TcpListener>,
}

/// Sockets the application will serve from.
pub enum ListenerPlan {
    /// One listener split by the multiplexer.
    Multiplexed(Listener),
    /// Each enabled protocol owns a listener.
    Dedicated {
        http: Option<Listener>,
        grpc: Option<Listener>,
    },
}

impl ListenerPlan {
    pub fn is_multiplexed(&self) -> bool {
        matches!(self, ListenerPlan::Multiplexed(_))
    }
}

/// Binds or adopts the listeners `config` calls for.
pub async fn plan_listeners(config: &AppConfig, prebound: Prebound) -> Result<ListenerPlan, Error> {
    let max = config.listener.max_connections;
    let Prebound { mut shared, http, grpc } = prebound;

    let http_own = own_listener(http, config.http.address.as_deref(), "http.address", max).await?;
    let grpc_own = own_listener(grpc, config.grpc.address.as_deref(), "grpc.address", max).await?;

    let (http_on, grpc_on) = (config.http.enabled, config.grpc.enabled);
    if http_on && grpc_on && http_own.is_none() && grpc_own.is_none() {
        let listener = shared_listener(&mut shared, config).await?;
        tracing::info!(address = %listener.local_addr()?, "Serving both protocols on one listener");
        return Ok(ListenerPlan::Multiplexed(listener));
    }

    let http = match (http_on, http_own) {
        (false, _) => None,
        (true, Some(own)) => Some(own),
        (true, None) => Some(shared_listener(&mut shared, config).await?),
    };
    let grpc = match (grpc_on, grpc_own) {
        (false, _) => None,
        (true, Some(own)) => Some(own),
        (true, None) => Some(shared_listener(&mut shared, config).await?),
    };
    Ok(ListenerPlan::Dedicated { http, grpc })
}

async fn own_listener(
    prebound: Option<TcpListener>,
    address: Option<&str>,
    field: &str,
    max_connections: usize,
) -> Result<Option<Listener>, Error> {
    if let Some(listener) = prebound {
        return Listener::from_tcp(listener, max_connections).map(Some);
    }
    match address {
        Some(address) => {
            let addr = parse_addr(field, address).map_err(Error::Configuration)?;
            Listener::bind(addr, max_connections).await.map(Some)
        }
        None => Ok(None),
    }
}

async fn shared_listener(prebound: &mut Option<TcpListener>, config: &AppConfig) -> Result<Listener, Error> {
    let max = config.listener.max_connections;
    if let Some(listener) = prebound.take() {
        return Listener::from_tcp(listener, max);
    }
    let addr = match config.listener.address.as_deref() {
        Some(address) => parse_addr("listener.address", address).map_err(Error::Configuration)?,
        None => {
            tracing::warn!(address = DYNAMIC_ADDRESS, "No listener address configured; using a dynamic port");
            dynamic_addr()?
        }
    };
    Listener::bind(addr, max).await
}

fn dynamic_addr() -> Result<SocketAddr, Error> {
    DYNAMIC_ADDRESS
        .parse()
        .map_err(|e| Error::configuration(format!("invalid dynamic address: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(http_address: Option<&str>, grpc_address: Option<&str>) -> AppConfig {
        let mut config = AppConfig::default();
        config.listener.address = Some("127.0.0.1:0".to_string());
        config.http.address = http_address.map(str::to_string);
        config.grpc.address = grpc_address.map(str::to_string);
        config
    }

    #[tokio::test]
    async fn both_protocols_without_overrides_share_one_listener() {
        let plan = plan_listeners(&config(None, None), Prebound::default()).await.unwrap();
        assert!(plan.is_multiplexed());
    }

    #[tokio::test]
    async fn one_override_skips_the_multiplexer() {
        let plan = plan_listeners(&config(Some("127.0.0.1:0"), None), Prebound::default())
            .await
            .unwrap();
        let ListenerPlan::Dedicated { http, grpc } = plan else {
            panic!("expected dedicated listeners");
        };
        assert!(http.is_some() && grpc.is_some());
    }

    #[tokio::test]
    async fn single_protocol_binds_shared_address_directly() {
        let mut config = config(None, None);
        config.grpc.enabled = false;
        let plan = plan_listeners(&config, Prebound::default()).await.unwrap();
        let ListenerPlan::Dedicated { http, grpc } = plan else {
            panic!("expected dedicated listeners");
        };
        assert!(http.is_some());
        assert!(grpc.is_none());
    }

    #[tokio::test]
    async fn prebound_listener_is_adopted() {
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = tcp.local_addr().unwrap();
        let prebound = Prebound {
            shared: Some(tcp),
            ..Default::default()
        };
        let mut config = AppConfig::default();
        config.listener.address = None;

        let ListenerPlan::Multiplexed(listener) = plan_listeners(&config, prebound).await.unwrap() else {
            panic!("expected a shared listener");
        };
        assert_eq!(listener.local_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn unparsable_address_is_configuration_error() {
        let err = plan_listeners(&config(Some("nowhere"), None), Prebound::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
