use crate::http::headers::Headers;
use crate::http::response::Response;

pub const ALLOW_ORIGIN: &str = "*";
pub const ALLOW_METHODS: &str = "GET, POST, PUT, PATCH, DELETE, OPTIONS";
pub const ALLOW_HEADERS: &str = "Origin, Content-Type, Authorization";

/// Adds the gateway's CORS headers, keeping any value already present.
pub fn apply(headers: &mut Headers) {
    headers.insert_if_absent("Access-Control-Allow-Origin", ALLOW_ORIGIN);
    headers.insert_if_absent("Access-Control-Allow-Methods", ALLOW_METHODS);
    headers.insert_if_absent("Access-Control-Allow-Headers", ALLOW_HEADERS);
}

/// Answer to a preflight `OPTIONS` request.
pub fn preflight() -> Response {
    let mut response = Response::no_content();
    apply(&mut response.headers);
    response
}
