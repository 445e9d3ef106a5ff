//! Routing table: which strategy and bucket serve a given request.

use url::Url;

use crate::api::Method;

use super::response::FetchRequest;

/// Freshness strategy applied to an intercepted GET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  NetworkFirst,
  StaleWhileRevalidate,
  CacheFirst,
}

/// Logical role of a cache bucket. The live bucket name is the role prefix
/// joined with the current version string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketRole {
  AppShell,
  ApiCache,
  UploadsCache,
  StaticCache,
}

impl BucketRole {
  pub fn prefix(&self) -> &'static str {
    match self {
      BucketRole::AppShell => "app-shell",
      BucketRole::ApiCache => "api-cache",
      BucketRole::UploadsCache => "uploads-cache",
      BucketRole::StaticCache => "static-cache",
    }
  }

  pub fn bucket_name(&self, version: &str) -> String {
    format!("{}-{}", self.prefix(), version)
  }
}

/// Predicate half of a route entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutePredicate {
  /// URL path starts with the given prefix.
  PathPrefix(&'static str),
  /// Any same-origin request (the catch-all entry).
  Any,
}

impl RoutePredicate {
  fn matches(&self, url: &Url) -> bool {
    match self {
      RoutePredicate::PathPrefix(prefix) => url.path().starts_with(prefix),
      RoutePredicate::Any => true,
    }
  }
}

/// One entry of the routing table.
#[derive(Debug, Clone, Copy)]
pub struct Route {
  pub predicate: RoutePredicate,
  pub strategy: Strategy,
  pub role: BucketRole,
}

/// Ordered route table, evaluated first-match-wins against same-origin GETs.
/// Non-GET methods and cross-origin URLs resolve to no route at all.
pub struct Router {
  origin: url::Origin,
  routes: Vec<Route>,
}

impl Router {
  pub fn new(origin: &Url, routes: Vec<Route>) -> Self {
    Self {
      origin: origin.origin(),
      routes,
    }
  }

  /// The standard Spiritualgram table: API traffic is network-first,
  /// uploaded media is stale-while-revalidate, everything else on the origin
  /// is cache-first.
  pub fn standard(origin: &Url) -> Self {
    Self::new(
      origin,
      vec![
        Route {
          predicate: RoutePredicate::PathPrefix("/api/"),
          strategy: Strategy::NetworkFirst,
          role: BucketRole::ApiCache,
        },
        Route {
          predicate: RoutePredicate::PathPrefix("/uploads/"),
          strategy: Strategy::StaleWhileRevalidate,
          role: BucketRole::UploadsCache,
        },
        Route {
          predicate: RoutePredicate::Any,
          strategy: Strategy::CacheFirst,
          role: BucketRole::StaticCache,
        },
      ],
    )
  }

  /// Resolve a request to a route, or `None` when the request should pass
  /// through untouched.
  pub fn resolve(&self, request: &FetchRequest) -> Option<&Route> {
    if request.method != Method::Get {
      return None;
    }
    if request.url.origin() != self.origin {
      return None;
    }
    self.routes.iter().find(|r| r.predicate.matches(&request.url))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn router() -> Router {
    Router::standard(&Url::parse("http://localhost:5000").unwrap())
  }

  fn get(url: &str) -> FetchRequest {
    FetchRequest::get(Url::parse(url).unwrap())
  }

  #[test]
  fn test_first_match_wins() {
    let router = router();

    let api = router.resolve(&get("http://localhost:5000/api/posts/feed")).unwrap();
    assert_eq!(api.strategy, Strategy::NetworkFirst);
    assert_eq!(api.role, BucketRole::ApiCache);

    let media = router.resolve(&get("http://localhost:5000/uploads/x.jpg")).unwrap();
    assert_eq!(media.strategy, Strategy::StaleWhileRevalidate);
    assert_eq!(media.role, BucketRole::UploadsCache);

    let shell = router.resolve(&get("http://localhost:5000/")).unwrap();
    assert_eq!(shell.strategy, Strategy::CacheFirst);
    assert_eq!(shell.role, BucketRole::StaticCache);
  }

  #[test]
  fn test_cross_origin_passes_through() {
    let router = router();
    assert!(router.resolve(&get("https://cdn.example.com/font.woff2")).is_none());
    // Different port is a different origin.
    assert!(router.resolve(&get("http://localhost:5173/api/posts")).is_none());
  }

  #[test]
  fn test_non_get_passes_through() {
    let router = router();
    let mut request = get("http://localhost:5000/api/posts");
    request.method = Method::Post;
    assert!(router.resolve(&request).is_none());
  }

  #[test]
  fn test_bucket_names_embed_version() {
    assert_eq!(BucketRole::AppShell.bucket_name("v1.0.0"), "app-shell-v1.0.0");
    assert_eq!(BucketRole::ApiCache.bucket_name("v2"), "api-cache-v2");
    assert_eq!(BucketRole::UploadsCache.bucket_name("v2"), "uploads-cache-v2");
    assert_eq!(BucketRole::StaticCache.bucket_name("v2"), "static-cache-v2");
  }
}
