use super::handlers::{health, otp};
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Endpoints registered here via `.routes(routes!(...))` are both served and
/// documented.
pub(crate) fn api_router() -> OpenApiRouter {
    OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(otp::request::request_code))
        .routes(routes!(otp::verify::verify_code))
        .routes(routes!(otp::token::check_token))
}

fn api_tags() -> Vec<Tag> {
    let mut otp_tag = Tag::new("otp");
    otp_tag.description = Some("Email one-time password verification".to_string());

    let mut health_tag = Tag::new("health");
    health_tag.description = Some("Service and store health".to_string());

    vec![otp_tag, health_tag]
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new()
        .info(info)
        .tags(Some(api_tags()))
        .build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    match author.find('<') {
        Some(start) => {
            let name = author[..start].trim();
            let email = author[start + 1..].trim_end_matches('>').trim();
            (
                (!name.is_empty()).then_some(name),
                (!email.is_empty()).then_some(email),
            )
        }
        None => {
            let name = author.trim();
            ((!name.is_empty()).then_some(name), None)
        }
    }
}
