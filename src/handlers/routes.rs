//! Route table for the whole HTTP surface

use serde::Deserialize;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use warp::http::HeaderMap;
use warp::hyper::body::Bytes;
use warp::{Filter, Rejection, Reply};

use crate::constants::{MAX_ENVELOPE_SIZE, POLL_PATH, WS_PATH};
use crate::core::ip_extractor::{extract_client_ip, IpExtractionConfig};
use crate::core::rate_limiter::RouteClass;
use crate::core::server::SharedServerManager;
use crate::handlers::api::{self, ApiResponse, BlockRequest, ReportRequest};
use crate::handlers::polling::SharedPollingTransport;
use crate::handlers::websocket::handle_ws_client;

#[derive(Debug, Deserialize)]
struct DrainQuery {
    /// Milliseconds to wait for an event when none is pending
    wait: Option<u64>,
}

/// Every route, with CORS and request logging applied
pub fn routes(
    server: SharedServerManager,
    polling: SharedPollingTransport,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let cors = cors(&server.config().allowed_origins);

    websocket_route(server.clone())
        .or(health_route(server.clone()))
        .or(report_route(server.clone()))
        .or(block_route(server.clone()))
        .or(polling_routes(server, polling))
        .recover(api::handle_rejection)
        .with(cors)
        .with(warp::log("studymate::http"))
}

fn cors(allowed_origins: &[String]) -> warp::cors::Builder {
    let builder = warp::cors()
        .allow_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_headers(vec!["content-type"]);

    // An empty list means local development: any origin
    if allowed_origins.is_empty() {
        builder.allow_any_origin()
    } else {
        builder.allow_origins(allowed_origins.iter().map(String::as_str))
    }
}

fn websocket_route(
    server: SharedServerManager,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path(WS_PATH)
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_client_ip(server.ip_config().clone()))
        .and(with_server(server))
        .map(|ws: warp::ws::Ws, ip: IpAddr, server: SharedServerManager| {
            log::debug!("WebSocket upgrade from {}", ip);
            // Oversized envelopes are answered with an error; only absurd
            // frames are cut off at the socket
            ws.max_message_size(MAX_ENVELOPE_SIZE * 4)
                .on_upgrade(move |socket| handle_ws_client(socket, server, ip))
        })
}

fn health_route(
    server: SharedServerManager,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_server(server))
        .and_then(api::health_handler)
}

fn report_route(
    server: SharedServerManager,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path("report")
        .and(warp::path::end())
        .and(warp::post())
        .and(rate_limited(server.clone(), RouteClass::General))
        .and(rate_limited(server.clone(), RouteClass::Report))
        .and(json_body::<ReportRequest>())
        .and(with_server(server))
        .and_then(|_general: IpAddr, ip: IpAddr, request: ReportRequest, server: SharedServerManager| {
            api::report_handler(request, ip, server)
        })
}

fn block_route(
    server: SharedServerManager,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path("block")
        .and(warp::path::end())
        .and(warp::post())
        .and(rate_limited(server.clone(), RouteClass::General))
        .and(json_body::<BlockRequest>())
        .and(with_server(server))
        .and_then(|_ip: IpAddr, request: BlockRequest, server: SharedServerManager| {
            api::block_handler(request, server)
        })
}

fn polling_routes(
    server: SharedServerManager,
    polling: SharedPollingTransport,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let connect = warp::path!("connect")
        .and(warp::post())
        .and(rate_limited(server.clone(), RouteClass::General))
        .and(with_polling(polling.clone()))
        .and_then(|ip: IpAddr, polling: SharedPollingTransport| async move {
            Ok::<_, Rejection>(warp::reply::json(&polling.connect(ip).await))
        });

    // Only join_queue is metered, inside PollingTransport::send
    let send = warp::path!(String / "send")
        .and(warp::post())
        .and(with_client_ip(server.ip_config().clone()))
        .and(warp::body::content_length_limit(MAX_ENVELOPE_SIZE as u64))
        .and(warp::body::bytes())
        .and(with_polling(polling.clone()))
        .and_then(
            |id: String, ip: IpAddr, body: Bytes, polling: SharedPollingTransport| async move {
                polling.send(&id, &body, ip).await?;
                Ok::<_, Rejection>(warp::reply::json(&ApiResponse::ok("Accepted")))
            },
        );

    // Draining is exempt from rate limiting: clients poll continuously
    let events = warp::path!(String / "events")
        .and(warp::get())
        .and(warp::query::<DrainQuery>())
        .and(with_polling(polling.clone()))
        .and_then(|id: String, query: DrainQuery, polling: SharedPollingTransport| async move {
            let wait = query.wait.map(Duration::from_millis);
            let events = polling.drain(&id, wait).await?;
            Ok::<_, Rejection>(warp::reply::json(&events))
        });

    let disconnect = warp::path!(String / "disconnect")
        .and(warp::post())
        .and(rate_limited(server, RouteClass::General))
        .and(with_polling(polling))
        .and_then(|id: String, _ip: IpAddr, polling: SharedPollingTransport| async move {
            polling.disconnect(&id).await?;
            Ok::<_, Rejection>(warp::reply::json(&ApiResponse::ok("Disconnected")))
        });

    warp::path(POLL_PATH).and(connect.or(send).or(events).or(disconnect))
}

fn json_body<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: serde::de::DeserializeOwned + Send,
{
    warp::body::content_length_limit(MAX_ENVELOPE_SIZE as u64).and(warp::body::json())
}

/// Resolve the caller's address, honouring proxy headers only from trusted proxies
pub fn with_client_ip(
    config: IpExtractionConfig,
) -> impl Filter<Extract = (IpAddr,), Error = Infallible> + Clone {
    warp::header::headers_cloned()
        .and(warp::addr::remote())
        .map(move |headers: HeaderMap, remote: Option<SocketAddr>| {
            extract_client_ip(&headers, remote, &config)
        })
}

/// Admit the request under `class` or reject it with 429
fn rate_limited(
    server: SharedServerManager,
    class: RouteClass,
) -> impl Filter<Extract = (IpAddr,), Error = Rejection> + Clone {
    with_client_ip(server.ip_config().clone())
        .and(with_server(server))
        .and_then(move |ip: IpAddr, server: SharedServerManager| async move {
            server.check_rate(class, ip).await?;
            Ok::<_, Rejection>(ip)
        })
}

fn with_server(
    server: SharedServerManager,
) -> impl Filter<Extract = (SharedServerManager,), Error = Infallible> + Clone {
    warp::any().map(move || server.clone())
}

fn with_polling(
    polling: SharedPollingTransport,
) -> impl Filter<Extract = (SharedPollingTransport,), Error = Infallible> + Clone {
    warp::any().map(move || polling.clone())
}
