//! Endpoint latency probing.
//!
//! Each cycle asks the target service for its route table, fills in the path
//! placeholders with stand-in values and times one request per route and
//! method. Samples are keyed by the route template so repeated
//! calls group together.

use std::time::{Duration, Instant};

use http::Method;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::{next_tick, ticker};
use crate::config::ProbeTarget;
use crate::delivery::{DeliveryClient, LatencySample};

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Route discovery answered {0}")]
    Status(u16),
    #[error("Invalid route path: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Deserialize)]
struct RouteEntry {
    #[serde(alias = "rule", alias = "endpoint")]
    path: String,
    #[serde(default)]
    methods: Vec<String>,
    #[serde(default)]
    method: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RouteListing {
    Bare(Vec<RouteEntry>),
    Wrapped { routes: Vec<RouteEntry> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub template: String,
    pub method: Method,
}

impl Route {
    pub fn path(&self) -> String {
        substitute_placeholders(&self.template)
    }
}

fn expand(listing: RouteListing) -> Vec<Route> {
    let entries = match listing {
        RouteListing::Bare(entries) | RouteListing::Wrapped { routes: entries } => entries,
    };
    let mut routes = Vec::new();
    for entry in entries {
        let mut methods: Vec<String> = entry.methods;
        methods.extend(entry.method);
        if methods.is_empty() {
            methods.push("GET".to_string());
        }
        for method in methods {
            let method = method.trim().to_ascii_uppercase();
            if method == "HEAD" || method == "OPTIONS" {
                continue;
            }
            match Method::from_bytes(method.as_bytes()) {
                Ok(method) => routes.push(Route {
                    template: entry.path.clone(),
                    method,
                }),
                Err(_) => log::warn!("Skipping {} with invalid method {method}", entry.path),
            }
        }
    }
    routes
}

/// Replace `<converter:name>` placeholders. Strings, including a bare `<name>`,
/// become `default`; everything else becomes `1`.
pub fn substitute_placeholders(template: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('<') {
        let Some(len) = rest[start..].find('>') else {
            break;
        };
        out.push_str(&rest[..start]);
        let inner = &rest[start + 1..start + len];
        let converter = match inner.split_once(':') {
            Some((converter, _)) => converter.trim(),
            None => "string",
        };
        out.push_str(match converter {
            "string" => "default",
            _ => "1",
        });
        rest = &rest[start + len + 1..];
    }
    out.push_str(rest);
    out
}

impl LatencySample {
    pub fn from_probe(route: &Route, elapsed: Duration, status_code: u16) -> Self {
        Self {
            endpoint: route.template.clone(),
            method: route.method.to_string(),
            latency_ms: elapsed.as_millis() as u64,
            status_code,
        }
    }
}

pub struct LatencyProber {
    http: reqwest::Client,
    target: ProbeTarget,
    delivery: DeliveryClient,
    interval: Duration,
    pause: Duration,
}

impl LatencyProber {
    pub fn new(
        http: reqwest::Client,
        target: ProbeTarget,
        delivery: DeliveryClient,
        interval: Duration,
        pause: Duration,
    ) -> Self {
        Self {
            http,
            target,
            delivery,
            interval,
            pause,
        }
    }

    pub async fn discover_routes(&self) -> Result<Vec<Route>, ProbeError> {
        let response = self.http.get(self.target.routes.clone()).send().await?;
        if !response.status().is_success() {
            return Err(ProbeError::Status(response.status().as_u16()));
        }
        let listing: RouteListing = response.json().await?;
        Ok(expand(listing))
    }

    pub async fn probe(&self, route: &Route) -> Result<LatencySample, ProbeError> {
        let url = self.target.route_url(&route.path())?;
        let started = Instant::now();
        let response = self.http.request(route.method.clone(), url).send().await?;
        let elapsed = started.elapsed();
        Ok(LatencySample::from_probe(
            route,
            elapsed,
            response.status().as_u16(),
        ))
    }

    /// Probe every discovered route once. Returns the number of samples sent.
    pub async fn cycle(&self) -> Result<usize, ProbeError> {
        let routes = self.discover_routes().await?;
        log::debug!("Probing {} routes", routes.len());
        let mut delivered = 0;
        for (i, route) in routes.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.pause).await;
            }
            match self.probe(route).await {
                Ok(sample) => {
                    log::debug!(
                        "{} {} took {}ms ({})",
                        sample.method,
                        sample.endpoint,
                        sample.latency_ms,
                        sample.status_code
                    );
                    if self.delivery.deliver(sample).await.is_ok() {
                        delivered += 1;
                    }
                }
                Err(e) => log::warn!("Latency probe of {} {} failed: {e}", route.method, route.template),
            }
        }
        Ok(delivered)
    }

    pub async fn run(self, stop: CancellationToken) {
        log::info!("Latency probing {} every {:?}", self.target.base, self.interval);
        let mut interval = ticker(self.interval);
        while next_tick(&mut interval, &stop).await {
            if let Err(e) = self.cycle().await {
                log::warn!("Latency probe cycle against {} failed: {e}", self.target.base);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::fake::{RecordingTransport, client};
    use crate::delivery::http::build_client;
    use mockito::Server;
    use serde_json::json;
    use std::sync::Arc;
    use url::Url;

    #[test]
    fn test_substitution() {
        assert_eq!(substitute_placeholders("/api/users/<int:id>"), "/api/users/1");
        assert_eq!(
            substitute_placeholders("/api/<string:team>/items/<int:item_id>"),
            "/api/default/items/1"
        );
        assert_eq!(substitute_placeholders("/files/<path:p>"), "/files/1");
        assert_eq!(substitute_placeholders("/raw/<name>"), "/raw/default");
        assert_eq!(
            substitute_placeholders("/teams/<team>/members/<int:id>"),
            "/teams/default/members/1"
        );
        assert_eq!(substitute_placeholders("/plain"), "/plain");
        assert_eq!(substitute_placeholders("/broken/<int:id"), "/broken/<int:id");
    }

    #[test]
    fn test_sample_keeps_template() {
        let route = Route {
            template: "/api/users/<int:id>".to_string(),
            method: Method::GET,
        };
        assert_eq!(route.path(), "/api/users/1");
        assert_eq!(
            LatencySample::from_probe(&route, Duration::from_millis(42), 200),
            LatencySample {
                endpoint: "/api/users/<int:id>".to_string(),
                method: "GET".to_string(),
                latency_ms: 42,
                status_code: 200,
            }
        );
    }

    #[test]
    fn test_route_listing_formats() {
        let listing: RouteListing = serde_json::from_value(json!([
            {"rule": "/api/users/<int:id>", "methods": ["GET", "HEAD", "OPTIONS", "delete"]},
            {"path": "/health"},
        ]))
        .expect("listing");
        let routes = expand(listing);
        assert_eq!(
            routes,
            vec![
                Route { template: "/api/users/<int:id>".to_string(), method: Method::GET },
                Route { template: "/api/users/<int:id>".to_string(), method: Method::DELETE },
                Route { template: "/health".to_string(), method: Method::GET },
            ]
        );

        let listing: RouteListing = serde_json::from_value(json!({
            "routes": [{"endpoint": "/x", "method": "POST"}]
        }))
        .expect("listing");
        assert_eq!(
            expand(listing),
            vec![Route { template: "/x".to_string(), method: Method::POST }]
        );
    }

    #[tokio::test]
    async fn test_cycle_probes_substituted_paths() {
        let mut server = Server::new_async().await;
        let _routes = server
            .mock("GET", "/debug/routes")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!([
                    {"rule": "/api/users/<int:id>", "methods": ["GET"]},
                    {"rule": "/api/orders", "methods": ["POST"]}
                ])
                .to_string(),
            )
            .create_async()
            .await;
        let users = server
            .mock("GET", "/api/users/1")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;
        let orders = server
            .mock("POST", "/api/orders")
            .with_status(500)
            .expect(1)
            .create_async()
            .await;

        let base = Url::parse(&server.url()).expect("url");
        let target = ProbeTarget {
            routes: base.join("/debug/routes").expect("url"),
            uptime: base.join("/").expect("url"),
            base,
        };
        let transport = Arc::new(RecordingTransport::default());
        let prober = LatencyProber::new(
            build_client(Duration::from_secs(5)).expect("client"),
            target,
            client(transport.clone()),
            Duration::from_secs(60),
            Duration::from_millis(1),
        );

        assert_eq!(prober.cycle().await.expect("cycle"), 2);
        users.assert_async().await;
        orders.assert_async().await;

        let samples: Vec<(String, String, u64)> = transport
            .bodies_for("/api/latency")
            .iter()
            .map(|body| {
                (
                    body["endpoint"].as_str().unwrap_or_default().to_string(),
                    body["method"].as_str().unwrap_or_default().to_string(),
                    body["status_code"].as_u64().unwrap_or_default(),
                )
            })
            .collect();
        assert_eq!(
            samples,
            vec![
                ("/api/users/<int:id>".to_string(), "GET".to_string(), 200),
                ("/api/orders".to_string(), "POST".to_string(), 500),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_discovery_is_an_error() {
        let mut server = Server::new_async().await;
        let _routes = server
            .mock("GET", "/debug/routes")
            .with_status(404)
            .create_async()
            .await;
        let base = Url::parse(&server.url()).expect("url");
        let target = ProbeTarget {
            routes: base.join("/debug/routes").expect("url"),
            uptime: base.join("/").expect("url"),
            base,
        };
        let transport = Arc::new(RecordingTransport::default());
        let prober = LatencyProber::new(
            build_client(Duration::from_secs(5)).expect("client"),
            target,
            client(transport.clone()),
            Duration::from_secs(60),
            Duration::from_millis(1),
        );

        assert!(matches!(prober.cycle().await, Err(ProbeError::Status(404))));
        assert!(transport.bodies().is_empty());
    }
}
