//! Small car inventory: JSON endpoints, a login middleware, content
//! negotiation and a forward from a legacy path.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/cars/42
//!   curl -X POST http://localhost:3000/cars \
//!        -H 'content-type: application/json' \
//!        -d '{"model":"roadster"}'
//!   curl -X DELETE -u admin:secret http://localhost:3000/cars/42
//!   curl -X PATCH http://localhost:3000/cars          → 405, Allow: GET,POST
//!   curl http://localhost:3000/vehicles/42            → forwarded to /cars/42

use rested::{Context, Dispatcher, Error, Json, RouteConfig, Server, StatusCode, middleware};
use serde::Serialize;
use serde_json::Value;

#[derive(Serialize)]
struct Car {
    id: String,
    model: &'static str,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let app = Dispatcher::new()
        .before(middleware::trace())
        .get("/cars", list_cars)
        .get("/cars/:carId", get_car)
        .post("/cars", create_car)
        .route(
            RouteConfig::new("/cars/:carId", delete_car)
                .method(rested::Method::DELETE)
                .before(require_admin),
        )
        .any("/vehicles/*rest", legacy_vehicles);

    Server::bind("0.0.0.0:3000")?.serve(app).await
}

// Plain text for clients that ask for it, JSON otherwise.
async fn list_cars(ctx: Context) {
    let cars = vec![Car { id: "42".into(), model: "roadster" }];
    match ctx.preferred_content_type(&["text/plain", "application/json"]).as_deref() {
        Some("text/plain") => {
            let lines: String = cars.iter().map(|c| format!("{} {}\n", c.id, c.model)).collect();
            ctx.send(lines)
        }
        _ => ctx.send(Json(cars)),
    }
}

async fn get_car(ctx: Context) -> Json<Car> {
    Json(Car { id: ctx.param("carId").unwrap_or_default(), model: "roadster" })
}

async fn create_car(ctx: Context) -> Result<(StatusCode, Value), Error> {
    let car = ctx.parsed_body(Some(16 * 1024)).await?.unwrap_or_default();
    ctx.set_response_header("location", "/cars/99")?;
    Ok((StatusCode::CREATED, car))
}

async fn delete_car(_ctx: Context) -> (StatusCode, ()) {
    (StatusCode::NO_CONTENT, ())
}

async fn require_admin(ctx: Context) {
    let auth = ctx.basic_auth();
    if auth.username.as_deref() != Some("admin") || auth.password.as_deref() != Some("secret") {
        let _ = ctx.set_response_header("www-authenticate", "Basic");
        return ctx.error_status(StatusCode::UNAUTHORIZED, "login required");
    }
    ctx.next().await
}

async fn legacy_vehicles(ctx: Context) {
    let rest = ctx.param("rest").unwrap_or_default();
    ctx.forward_to(&format!("/cars/{rest}")).await
}
