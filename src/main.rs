use actix_csrf::CsrfMiddleware;
use actix_session::{storage::CookieSessionStore, SessionMiddleware};
use actix_web::{
    cookie::Key,
    http::Method,
    middleware::{DefaultHeaders, Logger},
    web, App, HttpServer,
};
use clap::Parser;
use quillpad_backend::{
    config::Config, helper::mail_helpers::Mailer, middleware::ConfirmedAccountGate, routes,
};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rand::prelude::StdRng;
use std::convert::TryFrom;
use std::fs;
use std::path::PathBuf;
use tera::Tera;

#[derive(Parser, Debug)]
#[command(name = "quillpad_server", author, version, about = "Starts the Quillpad web server.")]
struct Cli {
    /// Path to the .env configuration file.
    #[arg(long, required = true, value_name = "FILE")]
    env_file: PathBuf,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let cli = Cli::parse();

    let config = Config::from_env(&cli.env_file)
        .expect("FATAL: Failed to load or parse configuration.");

    env_logger::init_from_env(env_logger::Env::new().default_filter_or(&config.log_level));

    let tera = Tera::new("templates/**/*.html").expect("Tera initialization failed");

    fs::create_dir_all(&config.database_path).expect("Failed to create database directory");
    fs::create_dir_all(config.avatar_dir()).expect("Failed to create media directory");

    let manager = SqliteConnectionManager::file(config.db_path());
    let pool = Pool::builder()
        .build(manager)
        .expect("FATAL: Failed to create Rusqlite connection pool.");

    let mailer = web::Data::new(
        Mailer::from_config(&config).expect("FATAL: Invalid mail configuration."),
    );

    let session_key_bytes = hex::decode(&config.session_secret_key)
        .expect("FATAL: SESSION_SECRET_KEY in .env is not a valid hex string.");
    let session_key = Key::try_from(session_key_bytes.as_slice())
        .expect("FATAL: The decoded SESSION_SECRET_KEY is not long enough (minimum 64 bytes required).");

    let server_address = format!("{}:{}", config.web.host, config.web.port);
    println!("🚀 Server starting at http://{}", server_address);

    HttpServer::new(move || {
        let session_mw =
            SessionMiddleware::builder(CookieSessionStore::default(), session_key.clone())
                .cookie_secure(config.use_secure_cookies)
                .cookie_http_only(true)
                .cookie_same_site(actix_web::cookie::SameSite::Lax)
                .build();

        // A token cookie is issued on every GET page that renders a form.
        let csrf = CsrfMiddleware::<StdRng>::new()
            .set_cookie(Method::GET, "/")
            .set_cookie(Method::GET, "/login")
            .set_cookie(Method::GET, "/register")
            .set_cookie(Method::GET, "/changepassword")
            .set_cookie(Method::GET, "/resetpasswordrequest")
            .set_cookie(Method::GET, "/resetpassword/{token}")
            .set_cookie(Method::GET, "/changeemailrequest")
            .set_cookie(Method::GET, "/editprofile")
            .set_cookie(Method::GET, "/write")
            .set_cookie(Method::GET, "/edit/{id}")
            .set_cookie(Method::GET, "/post/{id}");

        App::new()
            .wrap(Logger::default())
            .wrap(
                DefaultHeaders::new()
                    .add(("X-Content-Type-Options", "nosniff"))
                    .add(("X-Frame-Options", "DENY"))
                    .add(("X-XSS-Protection", "1; mode=block")),
            )
            .app_data(web::Data::new(config.clone()))
            .app_data(web::Data::new(tera.clone()))
            .app_data(web::Data::new(pool.clone()))
            .app_data(mailer.clone())
            .service(actix_files::Files::new("/media", &config.media_path))
            // Last wrap runs first: session, then the confirmation gate,
            // then CSRF validation.
            .service(
                web::scope("")
                    .wrap(csrf)
                    .wrap(ConfirmedAccountGate)
                    .wrap(session_mw)
                    .configure(routes::auth::config_routes)
                    .configure(routes::blog::config_routes),
            )
    })
    .bind(server_address)?
    .run()
    .await
}
