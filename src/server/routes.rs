// Route table and synchronizer for the dynamic tool endpoints
//
// The table is immutable once built. A rebuild constructs a complete
// replacement from the live catalog and publishes it with a single Arc
// swap, so requests either see the old table or the new one, never a
// half-updated mix. Rebuilds are serialized; a rebuild that cannot read
// the catalog leaves the previous table in place.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};

use crate::mcp::names::normalize_provider_name;
use crate::mcp::types::{NamespacedTool, SessionEvent};
use crate::mcp::AggregationLayer;

/// One routable tool endpoint: `POST /tools/{provider}/{tool}`.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub tool: NamespacedTool,
}

/// Immutable snapshot of every routable tool, keyed by the URL segments
/// (normalized provider name, tool name).
pub struct RouteTable {
    routes: HashMap<(String, String), RouteEntry>,
    pub built_at: DateTime<Utc>,
}

impl RouteTable {
    pub fn empty() -> Self {
        Self {
            routes: HashMap::new(),
            built_at: Utc::now(),
        }
    }

    fn from_catalog(catalog: Vec<NamespacedTool>) -> Self {
        let mut routes = HashMap::new();
        for tool in catalog {
            let key = (
                normalize_provider_name(&tool.provider_name),
                tool.name.clone(),
            );
            routes.insert(key, RouteEntry { tool });
        }
        Self {
            routes,
            built_at: Utc::now(),
        }
    }

    pub fn get(&self, provider: &str, tool: &str) -> Option<&RouteEntry> {
        self.routes.get(&(provider.to_string(), tool.to_string()))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Keeps the published [`RouteTable`] in sync with the aggregation layer.
pub struct RouteSynchronizer {
    aggregator: Arc<AggregationLayer>,
    table: RwLock<Arc<RouteTable>>,
    rebuild: Mutex<()>,
}

impl RouteSynchronizer {
    pub fn new(aggregator: Arc<AggregationLayer>) -> Self {
        Self {
            aggregator,
            table: RwLock::new(Arc::new(RouteTable::empty())),
            rebuild: Mutex::new(()),
        }
    }

    /// Current table. Cheap; callers hold the snapshot for the duration of
    /// one request.
    pub async fn table(&self) -> Arc<RouteTable> {
        Arc::clone(&*self.table.read().await)
    }

    /// Full rebuild from the live tool catalog. Returns the number of
    /// routes published.
    pub async fn synchronize(&self) -> usize {
        let _guard = self.rebuild.lock().await;
        let catalog = self.aggregator.list_tools().await;
        let next = Arc::new(RouteTable::from_catalog(catalog));
        let count = next.len();
        *self.table.write().await = next;
        tracing::debug!("route table rebuilt with {} route(s)", count);
        count
    }

    /// Rebuild the table whenever a provider's connection status changes.
    /// Status changes only happen on connect/disconnect, so this does not
    /// feed back into itself through discovery.
    pub fn watch(self: &Arc<Self>, mut events: broadcast::Receiver<SessionEvent>) {
        let sync = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::StatusChange { provider_id, status }) => {
                        tracing::debug!(
                            provider = %provider_id,
                            ?status,
                            "provider status changed, resynchronizing routes"
                        );
                        sync.synchronize().await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("route watcher lagged, skipped {} event(s)", skipped);
                        sync.synchronize().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}

/// Check a request's inputs against the tool's parameter schema. Returns a
/// human-readable reason on the first violation.
pub fn validate_inputs(schema: &Value, inputs: &Map<String, Value>) -> Result<(), String> {
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !inputs.contains_key(key) {
                return Err(format!("missing required input '{key}'"));
            }
        }
    }

    let properties = match schema.get("properties").and_then(Value::as_object) {
        Some(props) => props,
        None => return Ok(()),
    };
    for (key, value) in inputs {
        let Some(expected) = properties.get(key).and_then(|p| p.get("type")) else {
            continue;
        };
        let Some(expected) = expected.as_str() else {
            continue;
        };
        let ok = match expected {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "object" => value.is_object(),
            "array" => value.is_array(),
            _ => true,
        };
        if !ok {
            return Err(format!("input '{key}' must be of type {expected}"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "city": { "type": "string" },
                "days": { "type": "integer" },
                "verbose": { "type": "boolean" },
            },
            "required": ["city"],
        })
    }

    fn inputs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_validate_accepts_well_typed_inputs() {
        let result = validate_inputs(
            &schema(),
            &inputs(json!({ "city": "Oslo", "days": 3, "verbose": false })),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_required() {
        let err = validate_inputs(&schema(), &inputs(json!({ "days": 3 }))).unwrap_err();
        assert!(err.contains("city"));
    }

    #[test]
    fn test_validate_rejects_wrong_type() {
        let err =
            validate_inputs(&schema(), &inputs(json!({ "city": "Oslo", "days": "three" })))
                .unwrap_err();
        assert!(err.contains("days"));
        assert!(err.contains("integer"));
    }

    #[test]
    fn test_validate_allows_unknown_keys() {
        let result = validate_inputs(
            &schema(),
            &inputs(json!({ "city": "Oslo", "units": "metric" })),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_route_table_lookup_uses_normalized_provider() {
        let catalog = vec![NamespacedTool {
            name: "forecast".to_string(),
            namespaced_name: "weather_tools_forecast".to_string(),
            description: "Forecast".to_string(),
            parameters: json!({ "type": "object" }),
            provider_id: "wx".to_string(),
            provider_name: "Weather Tools".to_string(),
        }];
        let table = RouteTable::from_catalog(catalog);
        assert_eq!(table.len(), 1);
        assert!(table.get("weather_tools", "forecast").is_some());
        assert!(table.get("Weather Tools", "forecast").is_none());
    }

    #[tokio::test]
    async fn test_synchronize_swaps_table_atomically() {
        let aggregator = Arc::new(AggregationLayer::new());
        let sync = RouteSynchronizer::new(aggregator);

        let before = sync.table().await;
        assert!(before.is_empty());

        // No providers registered: the rebuild publishes a fresh empty
        // table, distinct from the old snapshot.
        sync.synchronize().await;
        let after = sync.table().await;
        assert!(!Arc::ptr_eq(&before, &after));
    }
}
