//! The cluster routing procedure.
//!
//! Topology is discovered by running
//! `CALL dbms.cluster.routing.getRoutingTable({context})` followed by
//! PULL_ALL against a router. The single result record carries the TTL
//! in seconds and the role/address listing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::bolt::{FailureDetail, Response, ResponseHandler, Value};
use crate::driver::address::BoltAddress;
use crate::driver::error::{DriverError, DriverResult};
use crate::driver::pool::PooledConnection;

use super::cluster_pool::ClusterConnectionPool;
use super::manager::Rediscovery;
use super::table::RoutingTable;

/// The routing procedure call, with the context passed as a parameter.
pub const ROUTING_PROCEDURE: &str = "CALL dbms.cluster.routing.getRoutingTable({context})";

/// Build the RUN statement and parameters for the routing procedure.
pub fn routing_statement(
    context: &HashMap<String, String>,
) -> (&'static str, HashMap<String, Value>) {
    let context_map: HashMap<String, Value> = context
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    let mut parameters = HashMap::new();
    parameters.insert("context".to_string(), Value::Map(context_map));
    (ROUTING_PROCEDURE, parameters)
}

/// Parse the procedure's single record: `[ttl_seconds, servers]` where
/// each server is `{role, addresses}`.
pub fn parse_routing_table(fields: &[Value]) -> DriverResult<RoutingTable> {
    if fields.len() != 2 {
        return Err(DriverError::protocol(format!(
            "Routing record carries {} fields, expected 2",
            fields.len()
        )));
    }
    let ttl_seconds = fields[0]
        .as_int()
        .filter(|ttl| *ttl >= 0)
        .ok_or_else(|| DriverError::protocol("Routing record TTL is not a non-negative integer"))?;
    let servers = fields[1]
        .as_list()
        .ok_or_else(|| DriverError::protocol("Routing record servers entry is not a list"))?;

    let mut routers = Vec::new();
    let mut readers = Vec::new();
    let mut writers = Vec::new();

    for server in servers {
        let entry = server
            .as_map()
            .ok_or_else(|| DriverError::protocol("Routing server entry is not a map"))?;
        let role = entry
            .get("role")
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::protocol("Routing server entry has no role"))?;
        let addresses = entry
            .get("addresses")
            .and_then(Value::as_list)
            .ok_or_else(|| DriverError::protocol("Routing server entry has no addresses"))?;

        let mut parsed = Vec::with_capacity(addresses.len());
        for address in addresses {
            let text = address
                .as_str()
                .ok_or_else(|| DriverError::protocol("Routing address is not a string"))?;
            parsed.push(BoltAddress::parse(text)?);
        }

        match role {
            "ROUTE" => routers.extend(parsed),
            "READ" => readers.extend(parsed),
            "WRITE" => writers.extend(parsed),
            _ => {}
        }
    }

    Ok(RoutingTable::new(
        routers,
        readers,
        writers,
        Duration::from_secs(ttl_seconds as u64),
    ))
}

/// Handler feeding a shared response log, so results survive the
/// handler's move into the request queue.
#[derive(Clone, Default)]
struct SharedCollector(Arc<Mutex<Vec<Response>>>);

impl SharedCollector {
    fn take(&self) -> Vec<Response> {
        std::mem::take(&mut self.0.lock())
    }
}

impl ResponseHandler for SharedCollector {
    fn on_success(&mut self, metadata: HashMap<String, Value>) {
        self.0.lock().push(Response::Success(metadata));
    }

    fn on_record(&mut self, fields: Vec<Value>) {
        self.0.lock().push(Response::Record(fields));
    }

    fn on_failure(&mut self, detail: FailureDetail) {
        self.0.lock().push(Response::Failure(detail));
    }

    fn on_ignored(&mut self) {
        self.0.lock().push(Response::Ignored);
    }
}

/// Production [`Rediscovery`]: borrows router connections from the
/// cluster pool and runs the routing procedure over them.
pub struct ProcedureRediscovery {
    pool: Arc<ClusterConnectionPool>,
    context: HashMap<String, String>,
}

impl ProcedureRediscovery {
    /// Rediscovery over `pool` with the configured routing context.
    pub fn new(pool: Arc<ClusterConnectionPool>, context: HashMap<String, String>) -> Self {
        Self { pool, context }
    }
}

#[async_trait]
impl Rediscovery for ProcedureRediscovery {
    type Connection = PooledConnection;

    async fn acquire(&self, router: &BoltAddress) -> DriverResult<PooledConnection> {
        self.pool.acquire(router).await
    }

    async fn fetch(&self, connection: &mut PooledConnection) -> DriverResult<RoutingTable> {
        let (statement, parameters) = routing_statement(&self.context);
        let records = SharedCollector::default();

        connection.run(statement, parameters, Box::new(records.clone()))?;
        connection.pull_all(Box::new(records.clone()))?;
        if let Err(error) = connection.sync().await {
            return Err(match error {
                DriverError::Server(e) if e.is_missing_procedure() => {
                    DriverError::service_unavailable(format!(
                        "Server at {} does not support the routing procedure",
                        connection.address()
                    ))
                }
                other => other,
            });
        }

        let mut rows: Vec<Vec<Value>> = records
            .take()
            .into_iter()
            .filter_map(|response| match response {
                Response::Record(fields) => Some(fields),
                _ => None,
            })
            .collect();
        if rows.len() != 1 {
            return Err(DriverError::protocol(format!(
                "Routing procedure returned {} records, expected 1",
                rows.len()
            )));
        }
        parse_routing_table(&rows.remove(0))
    }
}
