use actix_web::{http::StatusCode, HttpResponse};

// 通用 JSON 响应（序列化失败时退化为 Debug 文本）
// Generic JSON response, falling back to Debug text when serialization fails
pub fn respond_any<T: serde::Serialize + std::fmt::Debug>(code: StatusCode, data: T) -> HttpResponse {
    match serde_json::to_value(&data) {
        Ok(v) => HttpResponse::build(code).json(v),
        Err(_) => HttpResponse::build(code)
            .content_type("text/plain; charset=utf-8")
            .body(format!("{:?}", data)),
    }
}

// 统一错误体 / Uniform error body
pub fn respond_error(code: StatusCode, message: impl Into<String>) -> HttpResponse {
    respond_any(code, serde_json::json!({ "message": message.into(), "status": code.as_u16() }))
}
