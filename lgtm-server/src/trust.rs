use async_trait::async_trait;
use tracing::error;

use lgtm_core::{Login, TrustPolicy};

use crate::github::{GitHubClient, RepoRef};

/// Trusts the members of one organization team, looked up by team name.
///
/// Listing failures are logged and count as "not trusted".
pub struct TeamTrust<'a> {
    client: &'a GitHubClient,
    repo: RepoRef,
    team: Option<String>,
    correlation_id: Option<String>,
}

impl<'a> TeamTrust<'a> {
    pub fn new(
        client: &'a GitHubClient,
        repo: RepoRef,
        team: Option<String>,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            client,
            repo,
            team,
            correlation_id,
        }
    }
}

#[async_trait]
impl TrustPolicy for TeamTrust<'_> {
    async fn is_trusted_author(&self, author: &Login) -> bool {
        let Some(team_name) = self.team.as_deref().filter(|t| !t.is_empty()) else {
            return false;
        };
        let cid = self.correlation_id.as_deref();
        let org = &self.repo.owner;

        let teams = match self.client.list_teams(cid, &self.repo, org).await {
            Ok(teams) => teams,
            Err(e) => {
                error!("Failed to list teams in org {}: {:#}", org, e);
                return false;
            }
        };

        for team in teams.iter().filter(|t| t.name == team_name) {
            match self
                .client
                .list_team_members(cid, &self.repo, org, &team.slug)
                .await
            {
                Ok(members) => {
                    if members.iter().any(|m| Login::from(m.as_str()).same_account(author)) {
                        return true;
                    }
                }
                Err(e) => {
                    error!(
                        "Failed to list members in {}:{} (team id {}): {:#}",
                        org, team.name, team.id, e
                    );
                }
            }
        }
        false
    }
}
