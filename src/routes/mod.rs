/// Router Module Index
///
/// Organizes the routing into access-segregated modules. Access control is
/// applied per module with route layers in `create_router`, so a handler can
/// never be exposed by being mounted in the wrong place.

/// Routes reachable without a session.
pub mod public;

/// Routes behind the session middleware, for any live user.
pub mod authenticated;

/// Routes for Panel users only, nested under `/panel`.
pub mod panel;

/// Routes for Dashboard users only, nested under `/dashboard`.
pub mod dashboard;
