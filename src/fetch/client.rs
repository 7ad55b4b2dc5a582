use async_trait::async_trait;
use reqwest::{Request, Response};

/// Executes one outbound request. Implemented by [`super::BasicClient`] and by
/// test doubles that hand back canned responses.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
