use collabhub::{Config, build_rocket};

#[rocket::launch]
fn rocket() -> _ {
    dotenvy::dotenv().ok();
    let config = Config::load().expect("Failed to load configuration");
    build_rocket(config)
}
