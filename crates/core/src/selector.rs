use chrono::{SecondsFormat, Utc};
use tracing::debug;

use crate::capacity::{CapacityInspector, CapacityProbe};
use crate::error::{PlacementError, Result};
use crate::model::{
    CapacityInfo, PlacementReport, Policy, Share, ShareAssessment, Verdict, GIB,
};
use crate::remotefs::RemoteFsClient;

/// Applies the placement policy to a share's live capacity.
///
/// The used-ratio check runs first: oversubscription accounting can report
/// headroom on a share whose real disk is nearly full.
pub fn evaluate(policy: &Policy, capacity: &CapacityInfo, requested_size_gib: u64) -> Verdict {
    let requested = requested_size_gib as f64 * GIB;
    let CapacityInfo {
        total_size,
        total_available,
        total_allocated,
    } = *capacity;

    if !(total_size > 0.0) {
        return Verdict::ZeroCapacity;
    }

    let apparent_size = (total_size * policy.oversub_ratio).max(0.0);
    let apparent_available = (apparent_size - total_allocated).max(0.0);
    let used_fraction = (total_size - total_available) / total_size;

    if used_fraction > policy.used_ratio {
        return Verdict::UsedRatioExceeded {
            used_fraction,
            used_ratio: policy.used_ratio,
        };
    }
    if apparent_available <= requested {
        return Verdict::InsufficientApparentSpace {
            apparent_available,
            requested,
        };
    }
    let reserved_ratio = total_allocated / total_size;
    if reserved_ratio >= policy.oversub_ratio {
        return Verdict::ReservedAboveOversub {
            reserved_ratio,
            oversub_ratio: policy.oversub_ratio,
        };
    }
    Verdict::Eligible { apparent_available }
}

pub struct ShareSelector<'a> {
    policy: Policy,
    inspector: CapacityInspector<'a>,
}

impl<'a> ShareSelector<'a> {
    pub fn new(
        policy: Policy,
        client: &'a dyn RemoteFsClient,
        probe: &'a dyn CapacityProbe,
    ) -> Self {
        Self {
            policy,
            inspector: CapacityInspector::new(client, probe),
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn is_eligible(&self, share: &str, requested_size_gib: u64) -> Result<bool> {
        let capacity = self.inspector.capacity_info(share)?;
        let verdict = evaluate(&self.policy, &capacity, requested_size_gib);
        log_rejection(share, &verdict);
        Ok(verdict.is_eligible())
    }

    /// Picks the eligible share with the least allocated bytes. Ties keep the
    /// earlier share, so callers must pass shares in a stable order.
    pub fn find_share(&self, shares: &[Share], requested_size_gib: u64) -> Result<Share> {
        if shares.is_empty() {
            return Err(PlacementError::NoSharesMounted);
        }

        let mut target: Option<(&Share, f64)> = None;
        for share in shares {
            let capacity = self.inspector.capacity_info(&share.address)?;
            let verdict = evaluate(&self.policy, &capacity, requested_size_gib);
            if !verdict.is_eligible() {
                log_rejection(&share.address, &verdict);
                continue;
            }
            match target {
                Some((_, reserved)) if reserved <= capacity.total_allocated => {}
                _ => target = Some((share, capacity.total_allocated)),
            }
        }

        let (share, _) = target.ok_or(PlacementError::NoSuitableShareFound {
            volume_size: requested_size_gib,
        })?;
        debug!("selected {} as target share", share.address);
        Ok(share.clone())
    }

    /// Per-share breakdown for reporting. Inspection failures are recorded on
    /// the assessment rather than aborting the whole report.
    pub fn assess_shares(&self, shares: &[Share], requested_size_gib: u64) -> Vec<ShareAssessment> {
        shares
            .iter()
            .map(|share| {
                let mount_point = self.inspector.mount_point(&share.address);
                match self.inspector.capacity_info(&share.address) {
                    Ok(capacity) => ShareAssessment {
                        share: share.address.clone(),
                        mount_point,
                        verdict: Some(evaluate(&self.policy, &capacity, requested_size_gib)),
                        capacity: Some(capacity),
                        error: None,
                    },
                    Err(err) => ShareAssessment {
                        share: share.address.clone(),
                        mount_point,
                        capacity: None,
                        verdict: None,
                        error: Some(err.to_string()),
                    },
                }
            })
            .collect()
    }

    /// Assessments plus the share `find_share` would pick, from one
    /// inspection pass.
    pub fn placement_report(&self, shares: &[Share], requested_size_gib: u64) -> PlacementReport {
        let assessments = self.assess_shares(shares, requested_size_gib);
        let mut selected: Option<&ShareAssessment> = None;
        for assessment in &assessments {
            let (Some(verdict), Some(capacity)) = (&assessment.verdict, &assessment.capacity)
            else {
                continue;
            };
            if !verdict.is_eligible() {
                continue;
            }
            match selected.and_then(|best| best.capacity) {
                Some(best) if best.total_allocated <= capacity.total_allocated => {}
                _ => selected = Some(assessment),
            }
        }

        PlacementReport {
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            requested_size_gib,
            policy: self.policy,
            selected: selected.map(|assessment| assessment.share.clone()),
            assessments,
        }
    }
}

fn log_rejection(share: &str, verdict: &Verdict) {
    if let Some(reason) = rejection_reason(verdict) {
        debug!("{share} {reason}");
    }
}

fn rejection_reason(verdict: &Verdict) -> Option<&'static str> {
    match verdict {
        Verdict::Eligible { .. } => None,
        Verdict::ZeroCapacity => Some("reports zero total size"),
        Verdict::UsedRatioExceeded { .. } => Some("is above used_ratio"),
        Verdict::InsufficientApparentSpace { .. } => {
            Some("apparent headroom below requested size")
        }
        Verdict::ReservedAboveOversub { .. } => Some("reserved space is above oversub_ratio"),
    }
}
