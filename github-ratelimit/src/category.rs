use std::fmt;

use http::Method;

/// A primary rate limit bucket identifying a class of endpoints.
///
/// General references (note there are some inconsistencies between them):
/// - <https://docs.github.com/en/rest/rate-limit/rate-limit#about-rate-limits>
/// - <https://docs.github.com/en/rest/rate-limit/rate-limit#get-rate-limit-status-for-the-authenticated-user>
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ResourceCategory {
    /// The default category, used for every method/path with no other match
    Core,
    /// `/search` endpoints, except for `/search/code`
    Search,
    /// `/search/code` endpoints
    CodeSearch,
    /// The GraphQL endpoint
    Graphql,
    /// `/repos/{owner}/{repo}/import`; a deprecated endpoint, still applicable
    SourceImport,
    /// Enterprise and organization audit log endpoints
    AuditLog,
    /// `POST /app/manfiests/{code}/conversions`
    IntegrationManifest,
    /// `POST /repos/{owner}/{repo}/dependency-graph/snapshots`
    DependencySnapshots,
    /// `POST /repos/{owner}/{repo}/code-scanning/sarifs`
    CodeScanningUpload,
    /// `POST /orgs/{org}/actions/runners`; assuming only POST requests count
    ActionsRunnerRegistration,
    /// `POST /scim` endpoints; no explicit documentation
    Scim,
    /// Sentinel for response-advertised categories outside the enumeration
    Unknown,
}

impl ResourceCategory {
    /// Every category a request can resolve to, i.e. all but [`Unknown`].
    ///
    /// [`Unknown`]: ResourceCategory::Unknown
    #[must_use]
    pub fn all() -> [ResourceCategory; 11] {
        [
            ResourceCategory::Core,
            ResourceCategory::Search,
            ResourceCategory::CodeSearch,
            ResourceCategory::Graphql,
            ResourceCategory::SourceImport,
            ResourceCategory::AuditLog,
            ResourceCategory::IntegrationManifest,
            ResourceCategory::DependencySnapshots,
            ResourceCategory::CodeScanningUpload,
            ResourceCategory::ActionsRunnerRegistration,
            ResourceCategory::Scim,
        ]
    }

    /// The wire symbol used by the `x-ratelimit-resource` response header.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceCategory::Core => "core",
            ResourceCategory::Search => "search",
            ResourceCategory::CodeSearch => "code_search",
            ResourceCategory::Graphql => "graphql",
            ResourceCategory::SourceImport => "source_import",
            ResourceCategory::AuditLog => "audit_log",
            ResourceCategory::IntegrationManifest => "integration_manifest",
            ResourceCategory::DependencySnapshots => "dependency_snapshots",
            ResourceCategory::CodeScanningUpload => "code_scanning_upload",
            ResourceCategory::ActionsRunnerRegistration => {
                "actions_runner_registration"
            }
            ResourceCategory::Scim => "scim",
            ResourceCategory::Unknown => "unknown",
        }
    }

    /// Parses a response-advertised category symbol.
    ///
    /// Symbols outside the enumeration map to [`ResourceCategory::Unknown`]
    /// so that callers can report them without tracking them.
    #[must_use]
    pub fn parse(symbol: &str) -> ResourceCategory {
        ResourceCategory::all()
            .into_iter()
            .find(|category| category.as_str() == symbol)
            .unwrap_or(ResourceCategory::Unknown)
    }

    /// Resolves the category for a request from its method and path.
    ///
    /// Matching is case-sensitive and first-match-wins; requests with no
    /// matching rule belong to [`ResourceCategory::Core`]. The resolver is
    /// total: it never returns [`ResourceCategory::Unknown`].
    #[must_use]
    pub fn of_request(method: &Method, path: &str) -> ResourceCategory {
        // method-agnostic checks:
        if path.starts_with("/search/code") {
            return ResourceCategory::CodeSearch;
        }
        if path.starts_with("/search") {
            return ResourceCategory::Search;
        }
        if path.starts_with("/graphql") {
            return ResourceCategory::Graphql;
        }
        if path.starts_with("/repos/") && path.ends_with("/import") {
            return ResourceCategory::SourceImport;
        }
        if path.ends_with("/audit_log") {
            return ResourceCategory::AuditLog;
        }

        if method == Method::POST {
            // the upstream route really is spelled "manfiests"
            if path.starts_with("/app/manfiests/")
                && path.ends_with("/conversions")
            {
                return ResourceCategory::IntegrationManifest;
            }
            if path.starts_with("/repos/")
                && path.ends_with("/dependency-graph/snapshots")
            {
                return ResourceCategory::DependencySnapshots;
            }
            if path.starts_with("/repos/")
                && path.ends_with("/code-scanning/sarifs")
            {
                return ResourceCategory::CodeScanningUpload;
            }
            if path.starts_with("/orgs/") && path.ends_with("/actions/runners")
            {
                return ResourceCategory::ActionsRunnerRegistration;
            }
            if path.starts_with("/scim") {
                return ResourceCategory::Scim;
            }
        }

        ResourceCategory::Core
    }
}

impl fmt::Display for ResourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}
