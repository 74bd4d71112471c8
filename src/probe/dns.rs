//! DNS resolution probe.
//!
//! Uses the system resolver by default. When custom servers are configured,
//! one resolver is built per server and every query is raced against all of
//! them; the earliest answer wins and its wall latency is reported.

use std::net::IpAddr;

use futures::future::select_ok;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::ProtoErrorKind;
use hickory_resolver::{ResolveError, ResolveErrorKind, TokioResolver};
use tokio::time::{timeout_at, Instant};

use super::{elapsed_ms, CheckResult, ProbeStatus};
use crate::endpoint::{CheckKind, IpVersionPref};

/// System resolver plus one resolver per configured custom server.
pub(crate) struct Resolvers {
    system: TokioResolver,
    custom: Vec<TokioResolver>,
}

impl Resolvers {
    pub(crate) fn new(custom_servers: &[IpAddr]) -> anyhow::Result<Self> {
        let system = match TokioResolver::builder_tokio() {
            Ok(builder) => builder.build(),
            Err(err) => {
                tracing::warn!("system resolver configuration unavailable ({err}), using defaults");
                TokioResolver::builder_with_config(
                    ResolverConfig::default(),
                    TokioConnectionProvider::default(),
                )
                .build()
            }
        };

        let custom = custom_servers
            .iter()
            .map(|server| {
                let group = NameServerConfigGroup::from_ips_clear(&[*server], 53, true);
                let config = ResolverConfig::from_parts(None, Vec::new(), group);
                TokioResolver::builder_with_config(config, TokioConnectionProvider::default())
                    .build()
            })
            .collect();

        Ok(Resolvers { system, custom })
    }

    /// Resolve `host` as a full probe, reporting latency and addresses.
    pub(crate) async fn probe(
        &self,
        host: &str,
        family: IpVersionPref,
        started_at: Instant,
        deadline: Instant,
    ) -> CheckResult {
        let outcome = timeout_at(deadline, self.lookup(host)).await;
        let latency_ms = elapsed_ms(started_at);

        match outcome {
            Err(_elapsed) => CheckResult::fail(
                CheckKind::Dns,
                started_at,
                ProbeStatus::Timeout,
                "query timed out",
            ),
            Ok(Err(err)) => {
                let (status, detail) = classify(&err);
                CheckResult::fail(CheckKind::Dns, started_at, status, detail)
            }
            Ok(Ok(addrs)) => {
                let resolved = filter_family(addrs, family);
                if resolved.is_empty() {
                    return CheckResult::fail(
                        CheckKind::Dns,
                        started_at,
                        ProbeStatus::NameError,
                        "no addresses for requested family",
                    );
                }
                let mut result = CheckResult::ok(CheckKind::Dns, started_at, latency_ms);
                result.resolved = resolved;
                result
            }
        }
    }

    /// Best-effort single-address resolution for probes that need a target
    /// when no DNS check ran this tick.
    pub(crate) async fn resolve_one(
        &self,
        host: &str,
        family: IpVersionPref,
        deadline: Instant,
    ) -> Option<IpAddr> {
        match timeout_at(deadline, self.lookup(host)).await {
            Ok(Ok(addrs)) => filter_family(addrs, family).into_iter().next(),
            _ => None,
        }
    }

    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError> {
        if self.custom.is_empty() {
            let lookup = self.system.lookup_ip(host).await?;
            return Ok(lookup.iter().collect());
        }

        // Race all custom servers; first successful answer wins.
        let queries = self
            .custom
            .iter()
            .map(|resolver| Box::pin(resolver.lookup_ip(host)));
        let (lookup, _rest) = select_ok(queries).await?;
        Ok(lookup.iter().collect())
    }
}

fn filter_family(addrs: Vec<IpAddr>, family: IpVersionPref) -> Vec<IpAddr> {
    addrs.into_iter().filter(|a| family.admits(*a)).collect()
}

fn classify(err: &ResolveError) -> (ProbeStatus, String) {
    match err.kind() {
        ResolveErrorKind::Proto(proto) => match proto.kind() {
            // NXDOMAIN and NODATA both mean the name has nothing for us.
            ProtoErrorKind::NoRecordsFound { response_code, .. } => (
                ProbeStatus::NameError,
                format!("no records ({response_code})"),
            ),
            ProtoErrorKind::Timeout => (ProbeStatus::Timeout, "query timed out".into()),
            ProtoErrorKind::Io(io) => (ProbeStatus::Unreachable, io.to_string()),
            _ => (ProbeStatus::ProtocolError { code: None }, err.to_string()),
        },
        _ => (ProbeStatus::ProtocolError { code: None }, err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_filter_keeps_order() {
        let addrs: Vec<IpAddr> = vec![
            "1.1.1.1".parse().unwrap(),
            "2606:4700:4700::1111".parse().unwrap(),
            "1.0.0.1".parse().unwrap(),
        ];

        let v4 = filter_family(addrs.clone(), IpVersionPref::V4);
        assert_eq!(v4.len(), 2);
        assert_eq!(v4[0], "1.1.1.1".parse::<IpAddr>().unwrap());

        let v6 = filter_family(addrs.clone(), IpVersionPref::V6);
        assert_eq!(v6.len(), 1);

        let any = filter_family(addrs, IpVersionPref::Any);
        assert_eq!(any.len(), 3);
    }
}
