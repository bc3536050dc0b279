use axum::{
    http::Extensions,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use axum_entra_auth::{read_principal, request_gate, Validator, ValidatorConfig, HEALTH_PATH};

// Run with:
//   AUTH_AUTHORITY=common EXPECTED_AUDIENCE=api://my-app REQUIRED_SCOPE=api.access \
//   cargo run --example server
// or with REQUIRE_AUTH=false to let every request through anonymously.
async fn whoami(extensions: Extensions) -> String {
    match read_principal(&extensions) {
        "" => "anonymous\n".to_string(),
        user_id => format!("authenticated as {user_id}\n"),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = ValidatorConfig::from_env().expect("Invalid auth configuration");
    let validator = Validator::new(config).expect("Failed to build validator");

    let app = Router::new()
        .route(HEALTH_PATH, get(|| async { "OK" }))
        .route("/query", post(whoami))
        .layer(from_fn_with_state(validator, request_gate));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000")
        .await
        .expect("Failed to bind server");
    println!("listening on http://127.0.0.1:3000");
    axum::serve(listener, app).await.expect("Server error");
}
