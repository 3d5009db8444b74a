//! Reaction selection.

use tracing::trace;

use crate::error::{Decision, NotApplicableReason, SyncError, SyncResult};
use crate::policy::{ChannelMatch, Reaction, SynchronizationPolicy};
use crate::resource::Resource;
use crate::shadow::SyncSituation;

/// Picks the reaction of a policy for a situation and channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReactionSelector;

impl ReactionSelector {
    /// Select the reaction to run.
    ///
    /// A reaction listing the channel explicitly is returned as soon as it is
    /// seen. Otherwise the last matching default reaction wins. Every
    /// reaction must name a situation; one that does not is a configuration
    /// error, even if it comes after the chosen one.
    pub fn select<'a>(
        policy: &'a SynchronizationPolicy,
        situation: SyncSituation,
        channel: Option<&str>,
        resource: &Resource,
    ) -> SyncResult<Decision<&'a Reaction>> {
        if let Some(index) = policy.reactions.iter().position(|r| r.situation.is_none()) {
            return Err(SyncError::configuration(format!(
                "No situation defined for reaction {index} of synchronization policy {} in {resource}",
                policy.display_name()
            )));
        }

        let mut default_reaction = None;
        for reaction in &policy.reactions {
            if reaction.situation != Some(situation) {
                continue;
            }
            match reaction.channel_match(channel) {
                ChannelMatch::Explicit => {
                    trace!(situation = %situation, channel = ?channel, "Reaction matched channel");
                    return Ok(Decision::Applicable(reaction));
                }
                ChannelMatch::Default => default_reaction = Some(reaction),
                ChannelMatch::None => {}
            }
        }

        Ok(match default_reaction {
            Some(reaction) => {
                trace!(situation = %situation, "Default reaction selected");
                Decision::Applicable(reaction)
            }
            None => Decision::NotApplicable(NotApplicableReason::NoReaction),
        })
    }
}
