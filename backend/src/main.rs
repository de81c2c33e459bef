use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use hdfnet::config::PipelineConfig;
use hdfnet::inference::{ModelBundle, Predictor, bundle};
use hdfnet::routes::{UploadLimits, configure_routes};
use std::env;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let config = match PipelineConfig::load() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Failed to load pipeline config: {}", e);
            return Err(std::io::Error::other(format!("Config loading failed: {}", e)));
        }
    };
    log::info!("Class index order: {:?}", config.classes.labels());

    let bundle = match bundle::load(&config) {
        Ok(bundle) => bundle,
        Err(e) => {
            log::error!("Failed to preload model bundle at startup: {}", e);
            return Err(std::io::Error::other(format!("Model loading failed: {}", e)));
        }
    };

    let predictor = web::Data::new(Predictor::new(bundle, &config));
    let limits = web::Data::new(UploadLimits::from(&config.server));
    let bind_address = format!("{}:{}", config.server.host, config.server.port);

    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(predictor.clone())
            .app_data(limits.clone())
            .configure(configure_routes::<ModelBundle>)
    })
    .bind(&bind_address)?
    .run()
    .await
}
