pub mod message;

use crate::models::context::ContextPointer;
use rocket::{catchers, routes, Build, Rocket};

pub fn mount(rocket: Rocket<Build>, context: ContextPointer) -> Rocket<Build> {
    rocket
        .manage(context)
        .mount("/", routes![message::message])
        .register("/", catchers![message::malformed, message::unprocessable])
}
