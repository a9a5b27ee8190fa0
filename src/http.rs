//! HTTP 辅助工具：CORS、客户端地址识别与请求日志。

use axum::extract::connect_info::ConnectInfo;
use axum::http::{HeaderMap, HeaderValue, Request};
use std::net::SocketAddr;
use tower_http::LatencyUnit;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, MakeSpan, TraceLayer};
use tracing::{Level, Span, info_span, warn};

/// 构建 CORS Layer：未配置来源列表时允许所有来源。
pub fn build_cors_layer(cors_origins: Option<&str>) -> CorsLayer {
    let Some(cors_origins) = cors_origins else {
        return CorsLayer::permissive();
    };

    let origins = cors_origins
        .split(',')
        .map(|origin| origin.trim())
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "invalid cors origin");
                None
            }
        })
        .collect::<Vec<_>>();

    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// 从代理头解析客户端地址，`CF-Connecting-IP` 优先于 `X-Forwarded-For`。
pub fn extract_forwarded_addr(headers: &HeaderMap) -> Option<String> {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    header_value("cf-connecting-ip").or_else(|| header_value("x-forwarded-for"))
}

/// 综合转发头与连接信息计算客户端地址。
pub fn resolve_client_addr(headers: &HeaderMap, connect_addr: Option<SocketAddr>) -> String {
    extract_forwarded_addr(headers)
        .or_else(|| connect_addr.map(|addr| addr.to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RequestSpan;

impl<B> MakeSpan<B> for RequestSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let connect_addr = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let client_addr = resolve_client_addr(request.headers(), connect_addr);

        info_span!(
            "request",
            client_addr,
            method = %request.method(),
            path = request.uri().path(),
        )
    }
}

/// 请求日志：记录客户端地址、方法、路径、状态码与耗时。
pub fn build_trace_layer() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>, RequestSpan> {
    TraceLayer::new_for_http()
        .make_span_with(RequestSpan)
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        )
}
