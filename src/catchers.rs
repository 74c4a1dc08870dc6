use rocket::catch;
use rocket::serde::json::Json;
use rocket::Request;

#[catch(401)]
pub fn unauthorized(_req: &Request) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "error": "Missing or invalid observer token. Provide it via Authorization: Bearer, X-API-Key header, or ?key= query param.",
        "code": "UNAUTHORIZED"
    }))
}

#[catch(404)]
pub fn not_found(_req: &Request) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "error": "Not found",
        "code": "NOT_FOUND"
    }))
}

#[catch(500)]
pub fn internal_error(_req: &Request) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "error": "Internal server error",
        "code": "INTERNAL_ERROR"
    }))
}
