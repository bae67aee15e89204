//! Process entry point. Configuration, wiring, and route mounting live in
//! `lib.rs`; this binary only launches what it builds.

#[rocket::main]
async fn main() {
    let rocket = match orderdesk_engine::rocket() {
        Ok(rocket) => rocket,
        Err(e) => {
            eprintln!("startup failed: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = rocket.launch().await {
        eprintln!("server error: {e}");
        std::process::exit(1);
    }
}
