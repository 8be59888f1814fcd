//! services/api/src/bin/api.rs

use api_lib::{
    adapters::DbAdapter,
    config::Config,
    error::ApiError,
    web::{
        auth::{login_handler, logout_handler, signup_handler},
        chat::{list_conversations_handler, list_messages_handler, mark_read_handler, send_message_handler},
        conversation_ws_handler,
        homework::{
            create_homework_handler, delete_homework_handler, list_homework_handler,
            update_homework_handler,
        },
        remarks::{
            create_remark_handler, delete_remark_handler, edit_remark_handler,
            list_remarks_handler, mark_remarks_seen_handler, unread_remarks_handler,
        },
        require_auth,
        rest::{dashboard_handler, me_handler, roster_handler},
        school::{
            create_assignment_handler, create_class_handler, create_parent_account_handler,
            create_student_handler, create_subject_handler, create_teacher_account_handler,
            create_teacher_handler, list_assignments_handler, list_classes_handler,
            list_students_handler, list_subjects_handler, list_teachers_handler,
            reassign_teacher_handler, update_student_handler, update_teacher_handler,
        },
        state::AppState,
        timetable::{child_timetable_handler, get_timetable_handler, put_timetable_handler},
        ApiDoc,
    },
};
use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderValue, Method,
};
use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use school_sync_core::InMemoryStore;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Select the Store & Build the Shared AppState ---
    let app_state = match &config.database_url {
        Some(database_url) => {
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(config.db_max_connections)
                .connect(database_url)
                .await?;
            let db_adapter = Arc::new(DbAdapter::new(db_pool));
            info!("Running database migrations...");
            db_adapter.run_migrations().await?;
            info!("Database migrations complete.");
            db_adapter.start_change_feed().await?;
            Arc::new(AppState::from_stores(db_adapter, config.clone()))
        }
        None => {
            warn!("DATABASE_URL is not set; using the in-memory store. Data is lost on restart.");
            Arc::new(AppState::from_stores(
                Arc::new(InMemoryStore::new()),
                config.clone(),
            ))
        }
    };

    // --- 3. CORS ---
    let origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!("Invalid CORS_ORIGIN '{}': {}", config.cors_origin, e))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // --- 4. Create the Web Router ---
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/signup", post(signup_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/me", get(me_handler))
        .route("/roster", get(roster_handler))
        .route("/dashboard", get(dashboard_handler))
        // School administration
        .route("/classes", post(create_class_handler).get(list_classes_handler))
        .route(
            "/classes/{class_id}/students",
            post(create_student_handler).get(list_students_handler),
        )
        .route("/students/{student_id}", put(update_student_handler))
        .route(
            "/classes/{class_id}/assignments",
            post(create_assignment_handler).get(list_assignments_handler),
        )
        .route(
            "/classes/{class_id}/assignments/{assignment_id}",
            put(reassign_teacher_handler),
        )
        .route(
            "/classes/{class_id}/timetable",
            put(put_timetable_handler).get(get_timetable_handler),
        )
        .route("/timetable", get(child_timetable_handler))
        .route("/subjects", post(create_subject_handler).get(list_subjects_handler))
        .route("/teachers", post(create_teacher_handler).get(list_teachers_handler))
        .route("/teachers/{teacher_id}", put(update_teacher_handler))
        .route("/accounts/teachers", post(create_teacher_account_handler))
        .route("/accounts/parents", post(create_parent_account_handler))
        // Messaging
        .route("/conversations", get(list_conversations_handler))
        .route(
            "/conversations/{email}/messages",
            get(list_messages_handler).post(send_message_handler),
        )
        .route("/conversations/{email}/read", post(mark_read_handler))
        .route("/ws/conversations/{email}", get(conversation_ws_handler))
        // Remarks
        .route("/remarks", post(create_remark_handler).get(list_remarks_handler))
        .route(
            "/remarks/{id}",
            put(edit_remark_handler).delete(delete_remark_handler),
        )
        .route("/remarks/seen", post(mark_remarks_seen_handler))
        .route("/remarks/unread", get(unread_remarks_handler))
        // Homework
        .route("/homework", post(create_homework_handler).get(list_homework_handler))
        .route(
            "/homework/{id}",
            put(update_homework_handler).delete(delete_homework_handler),
        )
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    // Combine API routes
    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 5. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
