use parley_core::config::{LimitsConfig, PostingPolicy};
use parley_core::validator::{PermissionResult, RequestValidator};
use parley_db::conversations::NewConversation;
use parley_db::DbPool;
use parley_models::request::{AnonymousSession, AuthContext, MessageRequest};

const ALICE: i64 = 10;
const MUTED: i64 = 11;
const DAVE: i64 = 12;
const MOD: i64 = 13;
const GONE: i64 = 14;

const GROUP: i64 = 100;
const LOBBY: i64 = 101;
const TOWNHALL: i64 = 102;
const PLAZA: i64 = 103;

const GUEST_TOKEN: &str = "guest-session";

struct TestContext {
    db: DbPool,
    validator: RequestValidator,
}

impl TestContext {
    async fn new() -> anyhow::Result<Self> {
        let db = parley_db::create_pool("sqlite::memory:", 1).await?;
        parley_db::run_migrations(&db).await?;

        for (id, username, role) in [
            (ALICE, "alice", "user"),
            (MUTED, "muted", "user"),
            (DAVE, "dave", "user"),
            (MOD, "mod", "moderator"),
            (GONE, "gone", "user"),
        ] {
            parley_db::users::create_user(&db, id, username, None, role, "en").await?;
        }
        sqlx::query("UPDATE users SET is_active = 0 WHERE id = $1")
            .bind(GONE)
            .execute(&db)
            .await?;

        for (id, identifier, kind, allow_anonymous) in [
            (GROUP, "group", "group", false),
            (LOBBY, "lobby", "group", true),
            (TOWNHALL, "townhall", "public", false),
            (PLAZA, "plaza", "global", false),
        ] {
            parley_db::conversations::create_conversation(
                &db,
                &NewConversation {
                    id,
                    identifier,
                    kind,
                    title: None,
                    allow_anonymous,
                },
            )
            .await?;
        }
        parley_db::conversations::add_member(&db, GROUP, ALICE, true).await?;
        parley_db::conversations::add_member(&db, GROUP, MUTED, false).await?;
        parley_db::conversations::add_member(&db, GROUP, MOD, true).await?;
        parley_db::conversations::add_member(&db, GROUP, GONE, true).await?;
        parley_db::anonymous::create_participant(&db, 900, GUEST_TOKEN, LOBBY, "guest", "en", true)
            .await?;

        let validator = Self::validator_with(&db, PostingPolicy::default());
        Ok(Self { db, validator })
    }

    fn validator_with(db: &DbPool, policy: PostingPolicy) -> RequestValidator {
        RequestValidator::new(db.clone(), LimitsConfig::default(), policy)
    }

    async fn check_user(
        &self,
        validator: &RequestValidator,
        user_id: i64,
        conversation_id: i64,
        content: &str,
    ) -> anyhow::Result<PermissionResult> {
        let request = MessageRequest {
            sender_id: Some(user_id),
            conversation: conversation_id.to_string(),
            content: content.to_string(),
            ..Default::default()
        };
        self.check(validator, request, AuthContext::User { user_id }, conversation_id)
            .await
    }

    async fn check_guest(
        &self,
        validator: &RequestValidator,
        conversation_id: i64,
    ) -> anyhow::Result<PermissionResult> {
        let request = MessageRequest {
            anonymous_session: Some(AnonymousSession {
                session_token: GUEST_TOKEN.to_string(),
            }),
            conversation: conversation_id.to_string(),
            content: "hello from a guest".to_string(),
            ..Default::default()
        };
        let auth = AuthContext::Anonymous {
            session_token: GUEST_TOKEN.to_string(),
        };
        self.check(validator, request, auth, conversation_id).await
    }

    async fn check(
        &self,
        validator: &RequestValidator,
        request: MessageRequest,
        auth: AuthContext,
        conversation_id: i64,
    ) -> anyhow::Result<PermissionResult> {
        let conversation = parley_db::conversations::load_conversation(&self.db, conversation_id)
            .await?
            .expect("seeded conversation");
        Ok(validator
            .check_permissions(&request, &auth, &conversation)
            .await?)
    }
}

fn denial(result: &PermissionResult) -> &str {
    assert!(!result.allowed, "expected a denial, got {result:?}");
    assert!(result.sender.is_none());
    result.reason.as_deref().unwrap_or_default()
}

#[tokio::test]
async fn anonymous_guest_posts_where_admitted() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;

    let lobby = ctx.check_guest(&ctx.validator, LOBBY).await?;
    assert!(lobby.allowed);
    let sender = lobby.sender.expect("resolved sender");
    assert!(sender.is_anonymous());
    assert_eq!(sender.user_id(), None);

    let group = ctx.check_guest(&ctx.validator, GROUP).await?;
    assert!(denial(&group).contains("anonymous"));
    Ok(())
}

#[tokio::test]
async fn non_member_posts_only_in_open_kinds() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;

    for open in [TOWNHALL, PLAZA] {
        let result = ctx.check_user(&ctx.validator, DAVE, open, "hi all").await?;
        assert!(result.allowed, "conversation {open}");
        assert_eq!(result.sender.and_then(|s| s.user_id()), Some(DAVE));
    }

    let group = ctx.check_user(&ctx.validator, DAVE, GROUP, "hi all").await?;
    assert!(denial(&group).contains("not a member"));

    let closed = TestContext::validator_with(
        &ctx.db,
        PostingPolicy {
            global_allows_non_members: false,
            ..Default::default()
        },
    );
    let townhall = ctx.check_user(&closed, DAVE, TOWNHALL, "hi all").await?;
    assert!(denial(&townhall).contains("not a member"));
    Ok(())
}

#[tokio::test]
async fn global_anonymous_posting_follows_policy() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;

    let default_policy = ctx.check_guest(&ctx.validator, PLAZA).await?;
    assert!(denial(&default_policy).contains("anonymous"));

    let open = TestContext::validator_with(
        &ctx.db,
        PostingPolicy {
            global_allows_anonymous: true,
            ..Default::default()
        },
    );
    assert!(ctx.check_guest(&open, PLAZA).await?.allowed);
    assert!(!ctx.check_guest(&open, GROUP).await?.allowed);
    Ok(())
}

#[tokio::test]
async fn inactive_account_is_denied() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    let result = ctx.check_user(&ctx.validator, GONE, GROUP, "still here?").await?;
    assert!(denial(&result).contains("inactive"));
    Ok(())
}

#[tokio::test]
async fn member_without_send_right_is_denied() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    let result = ctx.check_user(&ctx.validator, MUTED, GROUP, "let me talk").await?;
    assert!(denial(&result).contains("may not send"));
    assert!(ctx.check_user(&ctx.validator, ALICE, GROUP, "let me talk").await?.allowed);
    Ok(())
}

#[tokio::test]
async fn content_limit_follows_sender_role() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    let medium = "x".repeat(2500);

    let user = ctx.check_user(&ctx.validator, ALICE, GROUP, &medium).await?;
    assert!(denial(&user).contains("2000"));
    assert!(ctx.check_user(&ctx.validator, ALICE, GROUP, &"x".repeat(2000)).await?.allowed);

    let moderator = ctx.check_user(&ctx.validator, MOD, GROUP, &medium).await?;
    assert!(moderator.allowed);
    let too_long = ctx.check_user(&ctx.validator, MOD, GROUP, &"x".repeat(4001)).await?;
    assert!(denial(&too_long).contains("4000"));
    Ok(())
}
