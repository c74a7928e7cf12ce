use crate::models::context::ContextPointer;
use livechat_translator::{Error, Request, Response};
use rocket::serde::json::Json;
use rocket::{catch, post, State};

#[post("/message", format = "json", data = "<request>")]
pub async fn message(context: &State<ContextPointer>, request: Json<Request>) -> Json<Response> {
    Json(context.handler().handle(request.into_inner()).await)
}

#[catch(400)]
pub fn malformed() -> Json<Response> {
    Json(Response::failure(&Error::validation("malformed message")))
}

#[catch(422)]
pub fn unprocessable() -> Json<Response> {
    Json(Response::failure(&Error::validation("unknown action or missing fields")))
}
