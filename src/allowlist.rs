//! Fixed allow-list of upstream route shapes the proxy will forward.
//!
//! Matching is whole-string anchored: the segment count must match and
//! every segment must match, so the gateway cannot be used to reach
//! arbitrary upstream paths or sneak in extra path segments.

/// One path segment of an allow-listed route shape.
enum Segment {
    Literal(&'static str),
    OneOf(&'static [&'static str]),
    Digits,
}

use Segment::{Digits, Literal, OneOf};

const ALLOWED_ROUTES: &[&[Segment]] = &[
    &[
        Literal("trending"),
        OneOf(&["movie", "tv", "all"]),
        OneOf(&["day", "week"]),
    ],
    &[Literal("movie"), OneOf(&["popular", "top_rated", "now_playing"])],
    &[Literal("tv"), OneOf(&["popular", "top_rated"])],
    &[Literal("movie"), Digits],
    &[Literal("tv"), Digits],
    &[Literal("tv"), Digits, Literal("season"), Digits],
    &[Literal("search"), OneOf(&["multi", "movie", "tv"])],
    &[Literal("movie"), Digits, Literal("recommendations")],
    &[Literal("tv"), Digits, Literal("recommendations")],
    &[Literal("movie"), Digits, Literal("similar")],
    &[Literal("tv"), Digits, Literal("similar")],
    &[Literal("movie"), Digits, Literal("images")],
    &[Literal("tv"), Digits, Literal("images")],
    &[Literal("movie"), Digits, Literal("videos")],
    &[Literal("tv"), Digits, Literal("videos")],
    &[Literal("movie"), Digits, Literal("reviews")],
    &[Literal("tv"), Digits, Literal("reviews")],
    &[Literal("collection"), Digits],
];

/// Returns true iff the endpoint matches one of the allowed route shapes.
/// A `false` here is final; the proxy answers 403 and never retries.
pub fn is_allowed(endpoint: &str) -> bool {
    let Some(path) = endpoint.strip_prefix('/') else {
        return false;
    };
    let segments: Vec<&str> = path.split('/').collect();
    ALLOWED_ROUTES
        .iter()
        .any(|route| matches_route(route, &segments))
}

fn matches_route(route: &[Segment], segments: &[&str]) -> bool {
    route.len() == segments.len()
        && route
            .iter()
            .zip(segments)
            .all(|(pattern, segment)| pattern.matches(segment))
}

impl Segment {
    fn matches(&self, segment: &str) -> bool {
        match self {
            Segment::Literal(literal) => segment == *literal,
            Segment::OneOf(options) => options.contains(&segment),
            Segment::Digits => {
                !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_one_example_of_every_shape() {
        let examples = [
            "/trending/movie/day",
            "/trending/tv/week",
            "/trending/all/week",
            "/movie/popular",
            "/movie/top_rated",
            "/movie/now_playing",
            "/tv/popular",
            "/tv/top_rated",
            "/movie/12345",
            "/tv/550",
            "/tv/1399/season/4",
            "/search/multi",
            "/search/movie",
            "/search/tv",
            "/movie/550/recommendations",
            "/tv/1399/recommendations",
            "/movie/550/similar",
            "/tv/1399/similar",
            "/movie/550/images",
            "/tv/1399/images",
            "/movie/550/videos",
            "/tv/1399/videos",
            "/movie/550/reviews",
            "/tv/1399/reviews",
            "/collection/86311",
        ];
        for endpoint in examples {
            assert!(is_allowed(endpoint), "expected {} to be allowed", endpoint);
        }
    }

    #[test]
    fn rejects_structurally_similar_variants() {
        let rejected = [
            "/movie/12345/extra",
            "/movie/abc",
            "/moviex/123",
            "/movie/12a45",
            "/movie/-550",
            "/movie/",
            "/movie/550/",
            "/movie//550",
            "/tv/550/season",
            "/tv/550/season/one",
            "/trending/person/day",
            "/trending/movie/month",
            "/search/person",
            "/collection/86311/images",
            "/admin/secret",
            "/movie/550?x=1",
            "movie/550",
            "/",
            "",
        ];
        for endpoint in rejected {
            assert!(!is_allowed(endpoint), "expected {} to be rejected", endpoint);
        }
    }

    #[test]
    fn matching_is_case_sensitive() {
        assert!(!is_allowed("/Movie/550"));
        assert!(!is_allowed("/movie/POPULAR"));
    }
}
