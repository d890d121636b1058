use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;

use crate::config::AppConfig;
use crate::handlers;
use crate::state::AppState;

pub fn routes(config: &AppConfig) -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .nest("/images", image_routes(config))
        .nest("/download", download_routes())
        .nest("/collections", collection_routes())
        .nest("/admin/jobs", admin_job_routes())
        .nest("/events", event_routes())
}

fn image_routes(config: &AppConfig) -> OpenApiRouter<AppState> {
    let crud = OpenApiRouter::new()
        .routes(routes!(
            handlers::images::list_images,
            handlers::images::delete_images
        ))
        .routes(routes!(
            handlers::images::get_image,
            handlers::images::update_image
        ))
        .routes(routes!(handlers::images::get_image_file))
        .routes(routes!(handlers::images::get_image_transform))
        .routes(routes!(handlers::images::get_image_exif))
        .routes(routes!(handlers::images::download_image))
        .routes(routes!(handlers::images::restore_image))
        .routes(routes!(handlers::images::upload_image_from_url));

    let upload = OpenApiRouter::new()
        .routes(routes!(handlers::images::upload_image))
        .layer(handlers::images::upload_body_limit(
            config.storage.max_upload_bytes,
        ));

    crud.merge(upload)
}

fn download_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(handlers::downloads::sign_download))
        .routes(routes!(handlers::downloads::download_archive))
}

fn collection_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(
            handlers::collections::list_collections,
            handlers::collections::create_collection
        ))
        .routes(routes!(
            handlers::collections::get_collection,
            handlers::collections::update_collection,
            handlers::collections::delete_collection
        ))
        .routes(routes!(
            handlers::collections::add_collection_images,
            handlers::collections::remove_collection_images
        ))
}

fn admin_job_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(
            handlers::admin_jobs::enqueue_jobs,
            handlers::admin_jobs::list_jobs
        ))
        .routes(routes!(handlers::admin_jobs::job_stats))
        .routes(routes!(handlers::admin_jobs::list_dead_letters))
        .routes(routes!(handlers::admin_jobs::retry_dead_letter))
        .routes(routes!(handlers::admin_jobs::set_concurrency))
        .routes(routes!(
            handlers::admin_jobs::get_job,
            handlers::admin_jobs::cancel_job
        ))
}

fn event_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(handlers::events::event_socket))
        .routes(routes!(handlers::events::events_since))
        .routes(routes!(handlers::events::recent_events))
        .routes(routes!(handlers::events::event_clients))
}
