use actix_web::{middleware, web, App, HttpServer};

use kings_barber::{config::Config, db, routes, state::AppState};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    if let Err(err) = run().await {
        eprintln!("Startup error: {err}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .init();

    let config = Config::from_env();
    let pool = db::connect(&config.database_url, config.max_connections).await?;
    db::run_migrations(&pool).await?;
    db::seed_defaults(&pool, &config.seed_barber).await?;

    let state = AppState::new(pool);

    let address = config.bind_address();
    log::info!("Starting Kings Barber on http://{address}");

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(middleware::Logger::default())
            .configure(routes::configure)
    })
    .bind(address)?
    .run()
    .await?;

    Ok(())
}
