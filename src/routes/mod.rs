/// Router Module Index
///
/// Routes are grouped by who may reach them. Authentication is enforced by the
/// extractors each handler takes (`SessionUser` for pages, `AuthUser` for the API);
/// role and ownership checks go through `gate` inside the handlers.

/// Pages and endpoints open to anonymous visitors.
pub mod public;

/// HTML pages for logged-in users.
pub mod authenticated;

/// HTML pages for administrators, nested under `/admin`.
pub mod admin;

/// The JSON API, nested under `/api/v1`.
pub mod api;
