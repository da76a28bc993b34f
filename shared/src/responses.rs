use lambda_http::{http::StatusCode, Body, Error, Response};
use serde::Serialize;
use serde_json::Value;

/// Conventional response envelope used by every JSON endpoint
#[derive(Serialize)]
struct Envelope {
    success: bool,
    message: String,
    data: Value,
}

fn envelope(
    status: StatusCode,
    success: bool,
    message: &str,
    data: Value,
) -> Result<Response<Body>, Error> {
    let body = Envelope {
        success,
        message: message.to_string(),
        data,
    };
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(serde_json::to_string(&body)?.into())
        .map_err(Box::new)?)
}

pub fn ok<T: Serialize>(message: &str, data: &T) -> Result<Response<Body>, Error> {
    envelope(StatusCode::OK, true, message, serde_json::to_value(data)?)
}

pub fn created<T: Serialize>(message: &str, data: &T) -> Result<Response<Body>, Error> {
    envelope(StatusCode::CREATED, true, message, serde_json::to_value(data)?)
}

pub fn error(status: StatusCode, message: &str) -> Result<Response<Body>, Error> {
    envelope(status, false, message, Value::Null)
}

pub fn bad_request(message: &str) -> Result<Response<Body>, Error> {
    error(StatusCode::BAD_REQUEST, message)
}

pub fn unauthorized(message: &str) -> Result<Response<Body>, Error> {
    error(StatusCode::UNAUTHORIZED, message)
}

pub fn forbidden(message: &str) -> Result<Response<Body>, Error> {
    error(StatusCode::FORBIDDEN, message)
}

pub fn not_found(message: &str) -> Result<Response<Body>, Error> {
    error(StatusCode::NOT_FOUND, message)
}

pub fn conflict(message: &str) -> Result<Response<Body>, Error> {
    error(StatusCode::CONFLICT, message)
}

pub fn method_not_allowed() -> Result<Response<Body>, Error> {
    error(StatusCode::METHOD_NOT_ALLOWED, "Método não permitido")
}

/// Datastore unavailable; the original request cannot be served
pub fn service_unavailable() -> Result<Response<Body>, Error> {
    error(
        StatusCode::SERVICE_UNAVAILABLE,
        "Serviço temporariamente indisponível",
    )
}

pub fn no_content() -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("Access-Control-Allow-Origin", "*")
        .body(Body::Empty)
        .map_err(Box::new)?)
}

/// CORS preflight response
pub fn preflight() -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header(
            "Access-Control-Allow-Methods",
            "GET,POST,PUT,PATCH,DELETE,OPTIONS",
        )
        .header("Access-Control-Allow-Headers", "Content-Type,Authorization")
        .body(Body::Empty)
        .map_err(Box::new)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_json(resp: &Response<Body>) -> Value {
        serde_json::from_slice(&resp.body().to_vec()).unwrap()
    }

    #[test]
    fn ok_wraps_data_in_envelope() {
        let resp = ok("Tudo certo", &serde_json::json!({"x": 1})).unwrap();
        assert_eq!(resp.status(), 200);
        let json = body_json(&resp);
        assert_eq!(json["success"], true);
        assert_eq!(json["message"], "Tudo certo");
        assert_eq!(json["data"]["x"], 1);
    }

    #[test]
    fn error_has_null_data() {
        let resp = not_found("Projeto não encontrado").unwrap();
        assert_eq!(resp.status(), 404);
        let json = body_json(&resp);
        assert_eq!(json["success"], false);
        assert!(json["data"].is_null());
    }
}
