use std::net::IpAddr;
use std::str::FromStr;
use std::time::Instant;

use hickory_resolver::{
    TokioAsyncResolver,
    config::{NameServerConfigGroup, ResolverConfig, ResolverOpts},
    error::ResolveErrorKind,
    proto::rr::{RData, RecordType},
};

use crate::database::models::Monitor;
use crate::monitoring::checker::{CheckError, Checker, required};
use crate::monitoring::types::{Heartbeat, MonitorStatus};

pub const NO_RECORDS_MESSAGE: &str = "No records found";

const SUPPORTED_TYPES: [RecordType; 10] = [
    RecordType::A,
    RecordType::AAAA,
    RecordType::CAA,
    RecordType::CNAME,
    RecordType::MX,
    RecordType::NS,
    RecordType::PTR,
    RecordType::SOA,
    RecordType::SRV,
    RecordType::TXT,
];

/// DNS record checker
pub struct DnsChecker;

/// Parses the monitor's record type, defaulting to A
pub fn record_type(monitor: &Monitor) -> Result<RecordType, CheckError> {
    let raw = monitor.dns_resolve_type.as_deref().unwrap_or("A").trim().to_uppercase();
    RecordType::from_str(&raw)
        .ok()
        .filter(|parsed| SUPPORTED_TYPES.contains(parsed))
        .ok_or_else(|| CheckError::Config(format!("Unsupported DNS record type: {raw}")))
}

fn resolver_for(monitor: &Monitor) -> Result<TokioAsyncResolver, CheckError> {
    let mut options = ResolverOpts::default();
    options.timeout = monitor.timeout_duration();
    options.attempts = 1;
    options.cache_size = 0;

    let servers = monitor
        .dns_resolve_server
        .as_deref()
        .map(str::trim)
        .filter(|servers| !servers.is_empty());

    let Some(servers) = servers else {
        let (config, _) = hickory_resolver::system_conf::read_system_conf()
            .map_err(|error| CheckError::Config(format!("Unable to read system resolver: {error}")))?;
        return Ok(TokioAsyncResolver::tokio(config, options));
    };

    let ips = servers
        .split(',')
        .map(|server| server.trim().parse::<IpAddr>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| CheckError::Config(format!("Invalid DNS resolver address: {servers}")))?;

    let group = NameServerConfigGroup::from_ips_clear(&ips, monitor.port.unwrap_or(53), true);
    Ok(TokioAsyncResolver::tokio(ResolverConfig::from_parts(None, Vec::new(), group), options))
}

fn join_records(records: &[RData], render: impl Fn(&RData) -> Option<String>) -> String {
    records.iter().filter_map(render).collect::<Vec<_>>().join(" | ")
}

/// Renders resolved records the way they are shown to users
pub fn format_records(record_type: RecordType, records: &[RData]) -> String {
    match record_type {
        RecordType::MX => join_records(records, |record| match record {
            RData::MX(mx) => Some(format!("Hostname: {}; Priority: {}", mx.exchange(), mx.preference())),
            _ => None,
        }),
        RecordType::SRV => join_records(records, |record| match record {
            RData::SRV(srv) => Some(format!(
                "Target: {}; Port: {}; Priority: {}; Weight: {}",
                srv.target(),
                srv.port(),
                srv.priority(),
                srv.weight()
            )),
            _ => None,
        }),
        RecordType::SOA => records
            .iter()
            .find_map(|record| match record {
                RData::SOA(soa) => Some(format!(
                    "Primary-NS: {}; Hostmaster: {}; Serial: {}; Refresh: {}; Retry: {}; Expire: {}; MinTTL: {}",
                    soa.mname(),
                    soa.rname(),
                    soa.serial(),
                    soa.refresh(),
                    soa.retry(),
                    soa.expire(),
                    soa.minimum()
                )),
                _ => None,
            })
            .unwrap_or_default(),
        RecordType::CNAME | RecordType::PTR | RecordType::CAA => {
            records.first().map(ToString::to_string).unwrap_or_default()
        }
        _ => join_records(records, |record| Some(record.to_string())),
    }
}

#[async_trait::async_trait]
impl Checker for DnsChecker {
    async fn check(&self, monitor: &Monitor, heartbeat: &mut Heartbeat) -> Result<(), CheckError> {
        let hostname = required(monitor.hostname.as_deref(), "hostname")?;
        let record_type = record_type(monitor)?;
        let resolver = resolver_for(monitor)?;

        let start = Instant::now();
        let lookup = match resolver.lookup(hostname, record_type).await {
            Ok(lookup) => lookup,
            Err(error) if matches!(error.kind(), ResolveErrorKind::NoRecordsFound { .. }) => {
                // Answered but empty: a DOWN beat, not a failed check
                heartbeat.ping = Some(start.elapsed().as_millis() as u64);
                heartbeat.status = MonitorStatus::Down;
                heartbeat.msg = NO_RECORDS_MESSAGE.into();
                return Ok(());
            }
            Err(error) => return Err(CheckError::Network(error.to_string())),
        };
        heartbeat.ping = Some(start.elapsed().as_millis() as u64);

        let records: Vec<RData> = lookup
            .iter()
            .filter(|record| record.record_type() == record_type)
            .cloned()
            .collect();

        if records.is_empty() {
            heartbeat.status = MonitorStatus::Down;
            heartbeat.msg = NO_RECORDS_MESSAGE.into();
        } else {
            heartbeat.status = MonitorStatus::Up;
            heartbeat.msg = format_records(record_type, &records);
        }
        Ok(())
    }
}
