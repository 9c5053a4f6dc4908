use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::classifier::{TitleClass, TitleClassifier};
use crate::config::{CategoryRule, Config, Family};
use crate::locations::LocationTable;
use crate::repost::{RepostVerdict, UserStateStore};
use crate::resolver::CategoryEngine;
use crate::timestamp::TimestampChecker;

/// A forum submission as delivered by the collaborator. Read-only here; all
/// mutations go back through [`ModActions`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub author: String,
    pub created_utc: DateTime<Utc>,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub flair_class: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

/// A reply on a submission or on another reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub author: String,
    #[serde(default)]
    pub body: String,
}

/// Anything that can carry replies. Implemented by collaborator-side
/// wrappers for both submissions and comments, so the core never branches
/// on item type to fetch children.
pub trait HasReplies {
    fn replies(&self) -> anyhow::Result<Vec<Comment>>;
}

/// Moderation actions performed by the forum collaborator. The checker
/// only requests them; failures are logged and never roll back a committed
/// verdict.
pub trait ModActions {
    fn get_moderators(&self) -> anyhow::Result<HashSet<String>>;
    fn is_removed(&self, submission_id: &str) -> anyhow::Result<bool>;
    fn apply_flair(&self, post: &Submission, text: &str, class: &str) -> anyhow::Result<()>;
    fn remove(&self, post: &Submission) -> anyhow::Result<()>;
    /// Returns the id of the created reply.
    fn reply(&self, post: &Submission, text: &str) -> anyhow::Result<String>;
    fn report(&self, target_id: &str, reason: &str) -> anyhow::Result<()>;
    fn distinguish(&self, reply_id: &str) -> anyhow::Result<()>;
}

/// Classification outcome for one submission. Produced fresh per call and
/// not retained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verdict {
    pub family: Option<Family>,
    pub category: Option<String>,
    pub class: Option<String>,
    pub is_repost: bool,
    pub repost_exempt: bool,
    pub violations: Vec<String>,
}

/// Trade count encoded in a flair class of the form `i-<n>`, or a bare
/// numeric class from older flair generations.
/// No flair at all means a fresh account; a class that does not carry a
/// count (moderator flair, store flair) means the count is unknown.
pub fn trade_count(flair_class: Option<&str>) -> Option<u32> {
    match flair_class {
        None => Some(0),
        Some(class) => class.trim_start_matches(['i', '-']).parse().ok(),
    }
}

/// Returns true if any direct reply on the item was written by a
/// moderator.
pub fn mod_has_replied(item: &dyn HasReplies, mods: &HashSet<String>) -> anyhow::Result<bool> {
    Ok(item.replies()?.iter().any(|c| mods.contains(&c.author)))
}

/// Sequences classification, location validation, category resolution,
/// repost detection and the timestamp requirement for each submission, and
/// requests the resulting moderation actions from the collaborator.
pub struct PostChecker<A: ModActions> {
    config: Config,
    classifier: TitleClassifier,
    locations: LocationTable,
    categories: CategoryEngine,
    timestamps: TimestampChecker,
    store: UserStateStore,
    actions: A,
    moderators: Option<HashSet<String>>,
    seen: HashSet<String>,
}

impl<A: ModActions> PostChecker<A> {
    pub fn new(config: Config, store: UserStateStore, actions: A) -> anyhow::Result<Self> {
        config.validate()?;
        let classifier = TitleClassifier::new(&config)?;
        let locations = LocationTable::new(&config.locations);
        let timestamps = TimestampChecker::new(&config)?;
        let categories = CategoryEngine::new(config.clone())?;
        Ok(PostChecker {
            config,
            classifier,
            locations,
            categories,
            timestamps,
            store,
            actions,
            moderators: None,
            seen: HashSet::new(),
        })
    }

    /// Process one submission to a terminal verdict.
    ///
    /// A state-store failure aborts before any side effect so the outer
    /// at-least-once delivery can retry the submission. Collaborator
    /// failures after the verdict committed are logged and dropped.
    pub fn process(&mut self, post: &Submission) -> anyhow::Result<Verdict> {
        if self.seen.contains(&post.id) {
            log::debug!("Submission {} already processed, skipping", post.id);
            return Ok(Verdict::default());
        }

        let mut verdict = Verdict::default();

        let rule = match self.classifier.classify(&post.title) {
            TitleClass::Personal {
                location,
                have,
                want,
            } => {
                verdict.family = Some(Family::Personal);
                if self.locations.validate(&location).is_none() {
                    return self.reject(post, verdict, "location");
                }
                self.categories.resolve_personal(&have, &want).clone()
            }
            TitleClass::Informational { tag } => {
                verdict.family = Some(Family::Informational);
                match self.categories.resolve_informational(&tag) {
                    Some(rule) => rule.clone(),
                    None => return self.reject(post, verdict, "tag"),
                }
            }
            TitleClass::Unclassified => {
                return self.reject(post, verdict, "title");
            }
        };

        let family = self.categories.rule_family(&rule);
        verdict.family = Some(family);
        verdict.category = Some(rule.name.clone());
        verdict.class = Some(rule.class.clone());
        log::info!(
            "Submission {} by {} classified as {}/{}",
            post.id,
            post.author,
            family,
            rule.name
        );

        if rule.repost_check {
            let thresholds = self.config.family(family);
            let actions = &self.actions;
            let repost = self.store.check_and_update(
                &post.author,
                family,
                &post.id,
                post.created_utc,
                thresholds.upper_hour,
                thresholds.lower_min,
                |prior_id| {
                    actions.is_removed(prior_id).unwrap_or_else(|e| {
                        log::warn!("Failed to query removal state of {prior_id}: {e}");
                        false
                    })
                },
            )?;

            match repost {
                RepostVerdict::Flagged { prior_id } => {
                    verdict.is_repost = true;
                    self.flag_repost(post, &prior_id);
                    self.seen.insert(post.id.clone());
                    return Ok(verdict);
                }
                RepostVerdict::GraceExempt { prior_id } => {
                    verdict.repost_exempt = true;
                    log::info!(
                        "Submission {} is a grace-period repost of removed {prior_id}, no action",
                        post.id
                    );
                }
                RepostVerdict::Clean => {}
            }
        }

        if rule.timestamp_check {
            // Presence and placement are checked independently; a body with
            // no marker at all gets the report and the placement advisory.
            let check = self.timestamps.check(&post.body);
            if !check.present {
                self.try_action(
                    "report",
                    self.actions
                        .report(&post.id, "Missing timestamp in post body"),
                );
            }
            if !check.early {
                self.advise(
                    post,
                    "Please place your timestamp near the top of your post so \
                     moderators can verify it quickly.",
                );
            }
        }

        self.accept(post, &rule);
        self.seen.insert(post.id.clone());
        Ok(verdict)
    }

    /// The moderator list is cached on first success only. A failed lookup
    /// falls back to "not a moderator" for the current submission and is
    /// retried on the next one.
    fn is_moderator(&mut self, author: &str) -> bool {
        if self.moderators.is_none() {
            match self.actions.get_moderators() {
                Ok(mods) => self.moderators = Some(mods),
                Err(e) => {
                    log::warn!("Failed to fetch moderator list: {e}");
                    return false;
                }
            }
        }
        self.moderators.as_ref().unwrap().contains(author)
    }

    fn reject(
        &mut self,
        post: &Submission,
        mut verdict: Verdict,
        reason: &str,
    ) -> anyhow::Result<Verdict> {
        verdict.violations.push(reason.to_string());

        if self.is_moderator(&post.author) {
            log::info!(
                "Submission {} by moderator {} violates '{reason}', leaving alone",
                post.id,
                post.author
            );
            self.seen.insert(post.id.clone());
            return Ok(verdict);
        }

        log::info!(
            "Rejecting submission {} by {}: '{reason}' rule violated",
            post.id,
            post.author
        );
        self.try_action("remove", self.actions.remove(post));
        let text = format!(
            "Your submission has been removed because it violates the '{reason}' rule. \
             Please fix your {reason} and resubmit.",
        );
        self.advise(post, &text);
        self.seen.insert(post.id.clone());
        Ok(verdict)
    }

    fn flag_repost(&self, post: &Submission, prior_id: &str) {
        self.try_action("remove", self.actions.remove(post));
        let text = format!(
            "Your submission has been removed as a repost of {prior_id}. You may post \
             again once the repost window has passed."
        );
        self.advise(post, &text);
        self.try_action(
            "report",
            self.actions
                .report(&post.id, &format!("Possible repost: {prior_id}")),
        );
    }

    fn accept(&self, post: &Submission, rule: &CategoryRule) {
        self.try_action(
            "apply_flair",
            self.actions.apply_flair(post, &rule.name, &rule.class),
        );

        if let Some(required) = &rule.required_flair {
            let held = post.flair_class.as_deref().unwrap_or("");
            if !held.starts_with(required.as_str()) {
                self.try_action(
                    "report",
                    self.actions.report(
                        &post.id,
                        &format!("Author lacks required flair '{required}'"),
                    ),
                );
            }
        }

        if rule.reply {
            self.advise(post, &self.acceptance_reply(post, rule));
        }
    }

    fn acceptance_reply(&self, post: &Submission, rule: &CategoryRule) -> String {
        let reputation = match trade_count(post.flair_class.as_deref()) {
            Some(0) => "This user has no confirmed trades.".to_string(),
            Some(n) => format!("This user has {n} confirmed trades."),
            None => "This user's trade history could not be determined.".to_string(),
        };
        format!(
            "**{author}** has submitted a *{category}* post.\n\n{reputation}\n\n\
             Exercise caution when trading and always use a timestamped proof of item.",
            author = post.author,
            category = rule.name,
        )
    }

    /// Post a distinguished bot reply. Best-effort.
    fn advise(&self, post: &Submission, text: &str) {
        match self.actions.reply(post, text) {
            Ok(reply_id) => self.try_action("distinguish", self.actions.distinguish(&reply_id)),
            Err(e) => log::warn!("Failed to reply to {}: {e}", post.id),
        }
    }

    fn try_action(&self, what: &str, result: anyhow::Result<()>) {
        if let Err(e) = result {
            log::warn!("Failed to {what}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repost::UserStateStore;
    use chrono::TimeZone;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Action {
        Flair { id: String, text: String, class: String },
        Remove { id: String },
        Reply { id: String, text: String },
        Report { id: String, reason: String },
        Distinguish { id: String },
    }

    #[derive(Default)]
    struct Recording {
        actions: Vec<Action>,
        removed: HashSet<String>,
        moderators: HashSet<String>,
        mods_unavailable: bool,
    }

    #[derive(Clone, Default)]
    struct RecordingActions {
        inner: Rc<RefCell<Recording>>,
    }

    impl RecordingActions {
        fn with_moderator(name: &str) -> Self {
            let actions = Self::default();
            actions
                .inner
                .borrow_mut()
                .moderators
                .insert(name.to_string());
            actions
        }

        fn mark_removed(&self, id: &str) {
            self.inner.borrow_mut().removed.insert(id.to_string());
        }

        fn set_mods_unavailable(&self, unavailable: bool) {
            self.inner.borrow_mut().mods_unavailable = unavailable;
        }

        fn log(&self) -> Vec<Action> {
            self.inner.borrow().actions.clone()
        }
    }

    impl ModActions for RecordingActions {
        fn get_moderators(&self) -> anyhow::Result<HashSet<String>> {
            let inner = self.inner.borrow();
            if inner.mods_unavailable {
                anyhow::bail!("moderator listing unavailable");
            }
            Ok(inner.moderators.clone())
        }

        fn is_removed(&self, submission_id: &str) -> anyhow::Result<bool> {
            Ok(self.inner.borrow().removed.contains(submission_id))
        }

        fn apply_flair(&self, post: &Submission, text: &str, class: &str) -> anyhow::Result<()> {
            self.inner.borrow_mut().actions.push(Action::Flair {
                id: post.id.clone(),
                text: text.to_string(),
                class: class.to_string(),
            });
            Ok(())
        }

        fn remove(&self, post: &Submission) -> anyhow::Result<()> {
            let mut inner = self.inner.borrow_mut();
            inner.removed.insert(post.id.clone());
            inner.actions.push(Action::Remove {
                id: post.id.clone(),
            });
            Ok(())
        }

        fn reply(&self, post: &Submission, text: &str) -> anyhow::Result<String> {
            self.inner.borrow_mut().actions.push(Action::Reply {
                id: post.id.clone(),
                text: text.to_string(),
            });
            Ok(format!("reply-to-{}", post.id))
        }

        fn report(&self, target_id: &str, reason: &str) -> anyhow::Result<()> {
            self.inner.borrow_mut().actions.push(Action::Report {
                id: target_id.to_string(),
                reason: reason.to_string(),
            });
            Ok(())
        }

        fn distinguish(&self, reply_id: &str) -> anyhow::Result<()> {
            self.inner.borrow_mut().actions.push(Action::Distinguish {
                id: reply_id.to_string(),
            });
            Ok(())
        }
    }

    fn post(id: &str, author: &str, title: &str, secs: i64) -> Submission {
        Submission {
            id: id.to_string(),
            author: author.to_string(),
            created_utc: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            title: title.to_string(),
            body: "Timestamp: https://imgur.com/abc\n\nDetails inside.".to_string(),
            flair_class: None,
            removed: false,
        }
    }

    fn checker(actions: RecordingActions) -> PostChecker<RecordingActions> {
        let store = UserStateStore::open_in_memory().unwrap();
        PostChecker::new(Config::default(), store, actions).unwrap()
    }

    fn has_remove(log: &[Action], id: &str) -> bool {
        log.iter().any(|a| matches!(a, Action::Remove { id: r } if r == id))
    }

    #[test]
    fn test_clean_personal_post_gets_flair_and_reply() {
        let actions = RecordingActions::default();
        let mut checker = checker(actions.clone());

        let verdict = checker
            .process(&post("p1", "alice", "[US-NY] [H] Paypal [W] headphones", 0))
            .unwrap();

        assert_eq!(verdict.family, Some(Family::Personal));
        // Author has Paypal, so the buying rule's have pattern wins
        assert_eq!(verdict.category.as_deref(), Some("buying"));
        assert_eq!(verdict.class.as_deref(), Some("buy"));
        assert!(!verdict.is_repost);
        assert!(verdict.violations.is_empty());

        let log = actions.log();
        assert!(log.iter().any(|a| matches!(
            a,
            Action::Flair { id, class, .. } if id == "p1" && class == "buy"
        )));
        // reply flag is set on the buying category
        assert!(log.iter().any(|a| matches!(
            a,
            Action::Reply { id, text } if id == "p1" && text.contains("no confirmed trades")
        )));
        assert!(!has_remove(&log, "p1"));
    }

    #[test]
    fn test_unparseable_title_rejected_with_reason() {
        let actions = RecordingActions::default();
        let mut checker = checker(actions.clone());

        let verdict = checker
            .process(&post("p1", "alice", "selling random things", 0))
            .unwrap();

        assert_eq!(verdict.violations, vec!["title".to_string()]);
        let log = actions.log();
        assert!(has_remove(&log, "p1"));
        assert!(log.iter().any(|a| matches!(
            a,
            Action::Reply { text, .. } if text.contains("'title' rule")
        )));
    }

    #[test]
    fn test_bad_location_rejected_with_reason() {
        let actions = RecordingActions::default();
        let mut checker = checker(actions.clone());

        let verdict = checker
            .process(&post("p1", "alice", "[XX-YY] [H] Paypal [W] headphones", 0))
            .unwrap();

        assert_eq!(verdict.violations, vec!["location".to_string()]);
        assert!(has_remove(&actions.log(), "p1"));
    }

    #[test]
    fn test_unknown_info_tag_rejected_with_reason() {
        let actions = RecordingActions::default();
        let mut checker = checker(actions.clone());

        let verdict = checker
            .process(&post("p1", "alice", "[NONSENSE] hello", 0))
            .unwrap();

        assert_eq!(verdict.violations, vec!["tag".to_string()]);
        assert!(has_remove(&actions.log(), "p1"));
    }

    #[test]
    fn test_moderator_exempt_from_rejection() {
        let actions = RecordingActions::with_moderator("modwoman");
        let mut checker = checker(actions.clone());

        let verdict = checker
            .process(&post("p1", "modwoman", "completely freeform title", 0))
            .unwrap();

        assert_eq!(verdict.violations, vec!["title".to_string()]);
        assert!(actions.log().is_empty());
    }

    #[test]
    fn test_repost_flagged_and_references_original() {
        let actions = RecordingActions::default();
        let mut checker = checker(actions.clone());

        checker
            .process(&post("p1", "alice", "[US-NY] [H] Paypal [W] headphones", 0))
            .unwrap();
        let verdict = checker
            .process(&post("p2", "alice", "[US-NY] [H] Paypal [W] headphones", 1800))
            .unwrap();

        assert!(verdict.is_repost);
        assert!(!verdict.repost_exempt);

        let log = actions.log();
        assert!(has_remove(&log, "p2"));
        assert!(log.iter().any(|a| matches!(
            a,
            Action::Report { id, reason } if id == "p2" && reason == "Possible repost: p1"
        )));
        // No flair applied to the repost
        assert!(!log.iter().any(|a| matches!(
            a,
            Action::Flair { id, .. } if id == "p2"
        )));
    }

    #[test]
    fn test_grace_exempt_repost_gets_no_action() {
        let actions = RecordingActions::default();
        let mut checker = checker(actions.clone());

        checker
            .process(&post("p1", "alice", "[US-NY] [H] Paypal [W] headphones", 0))
            .unwrap();
        // Original taken down before the author reposts 5 minutes later
        actions.mark_removed("p1");
        let verdict = checker
            .process(&post("p2", "alice", "[US-NY] [H] Paypal [W] headphones", 300))
            .unwrap();

        assert!(verdict.repost_exempt);
        assert!(!verdict.is_repost);
        let log = actions.log();
        assert!(!has_remove(&log, "p2"));
        // Processing continued to acceptance
        assert!(log.iter().any(|a| matches!(
            a,
            Action::Flair { id, .. } if id == "p2"
        )));
    }

    #[test]
    fn test_reprocessing_same_submission_is_noop() {
        let actions = RecordingActions::default();
        let mut checker = checker(actions.clone());

        let first = post("p1", "alice", "[US-NY] [H] Paypal [W] headphones", 0);
        checker.process(&first).unwrap();
        let count = actions.log().len();

        let verdict = checker.process(&first).unwrap();
        assert_eq!(verdict, Verdict::default());
        assert_eq!(actions.log().len(), count);
    }

    #[test]
    fn test_missing_timestamp_reported() {
        let actions = RecordingActions::default();
        let mut checker = checker(actions.clone());

        let mut submission = post("p1", "alice", "[US-NY] [H] GPU [W] Paypal", 0);
        submission.body = "No proof here.".to_string();
        checker.process(&submission).unwrap();

        assert!(actions.log().iter().any(|a| matches!(
            a,
            Action::Report { id, reason } if id == "p1" && reason.contains("timestamp")
        )));
    }

    #[test]
    fn test_absent_timestamp_gets_report_and_advisory() {
        let actions = RecordingActions::default();
        let mut checker = checker(actions.clone());

        let mut submission = post("p1", "alice", "[US-NY] [H] GPU [W] Paypal", 0);
        submission.body = "No proof at all here.".to_string();
        checker.process(&submission).unwrap();

        // Presence and placement fail independently, so both the moderator
        // report and the placement advisory go out.
        let log = actions.log();
        assert!(log.iter().any(|a| matches!(
            a,
            Action::Report { id, reason } if id == "p1" && reason.contains("timestamp")
        )));
        assert!(log.iter().any(|a| matches!(
            a,
            Action::Reply { text, .. } if text.contains("near the top")
        )));
    }

    #[test]
    fn test_moderator_exemption_survives_transient_lookup_failure() {
        let actions = RecordingActions::with_moderator("modwoman");
        let mut checker = checker(actions.clone());

        // First submission arrives while the moderator listing is down;
        // the author is not exempted and the lookup result is not cached.
        actions.set_mods_unavailable(true);
        checker
            .process(&post("p1", "alice", "freeform title", 0))
            .unwrap();
        assert!(has_remove(&actions.log(), "p1"));

        actions.set_mods_unavailable(false);
        checker
            .process(&post("p2", "modwoman", "another freeform title", 60))
            .unwrap();
        assert!(!has_remove(&actions.log(), "p2"));
    }

    #[test]
    fn test_late_timestamp_gets_advisory_but_still_accepted() {
        let actions = RecordingActions::default();
        let mut checker = checker(actions.clone());

        let mut submission = post("p1", "alice", "[US-NY] [H] GPU [W] Paypal", 0);
        submission.body =
            "Selling a GPU.\nGood price.\nLocal pickup ok.\nMore below.\ntimestamp: imgur"
                .to_string();
        checker.process(&submission).unwrap();

        let log = actions.log();
        assert!(log.iter().any(|a| matches!(
            a,
            Action::Reply { text, .. } if text.contains("near the top")
        )));
        assert!(log.iter().any(|a| matches!(a, Action::Flair { .. })));
        assert!(!has_remove(&log, "p1"));
    }

    #[test]
    fn test_trade_count_parsing() {
        assert_eq!(trade_count(None), Some(0));
        assert_eq!(trade_count(Some("i-12")), Some(12));
        assert_eq!(trade_count(Some("i-0")), Some(0));
        // Older flair generations used a bare numeric class
        assert_eq!(trade_count(Some("5")), Some(5));
        assert_eq!(trade_count(Some("moderator")), None);
        assert_eq!(trade_count(Some("i-notanumber")), None);
    }

    #[test]
    fn test_acceptance_reply_mentions_trade_count() {
        let actions = RecordingActions::default();
        let mut checker = checker(actions.clone());

        let mut submission = post("p1", "alice", "[US-NY] [H] GPU [W] Paypal", 0);
        submission.flair_class = Some("i-7".to_string());
        checker.process(&submission).unwrap();

        assert!(actions.log().iter().any(|a| matches!(
            a,
            Action::Reply { text, .. } if text.contains("7 confirmed trades")
        )));
    }

    #[test]
    fn test_required_flair_missing_is_reported() {
        let actions = RecordingActions::default();
        let mut checker = checker(actions.clone());

        // The store category requires the verified-store flair
        checker
            .process(&post("p1", "acme", "[STORE] weekly deals", 0))
            .unwrap();

        assert!(actions.log().iter().any(|a| matches!(
            a,
            Action::Report { id, reason } if id == "p1" && reason.contains("verified-store")
        )));
    }

    #[test]
    fn test_bot_replies_are_distinguished() {
        let actions = RecordingActions::default();
        let mut checker = checker(actions.clone());

        checker
            .process(&post("p1", "alice", "[US-NY] [H] Paypal [W] headphones", 0))
            .unwrap();

        assert!(actions.log().iter().any(|a| matches!(
            a,
            Action::Distinguish { id } if id == "reply-to-p1"
        )));
    }

    struct StubThread {
        replies: Vec<Comment>,
    }

    impl HasReplies for StubThread {
        fn replies(&self) -> anyhow::Result<Vec<Comment>> {
            Ok(self.replies.clone())
        }
    }

    #[test]
    fn test_mod_has_replied() {
        let mods: HashSet<String> = ["modwoman".to_string()].into_iter().collect();
        let thread = StubThread {
            replies: vec![
                Comment {
                    id: "c1".to_string(),
                    author: "alice".to_string(),
                    body: String::new(),
                },
                Comment {
                    id: "c2".to_string(),
                    author: "modwoman".to_string(),
                    body: String::new(),
                },
            ],
        };
        assert!(mod_has_replied(&thread, &mods).unwrap());

        let unhandled = StubThread { replies: vec![] };
        assert!(!mod_has_replied(&unhandled, &mods).unwrap());
    }
}
