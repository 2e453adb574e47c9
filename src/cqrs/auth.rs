use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{event, Level};

use crate::{
    auth::{hash_password, verify_password, AuthenticatedUser, TokenService, TokenType},
    config::AdminBootstrap,
    domain::{new_id, Role, User},
    dtos::{AuthResponse, MessageResponse, TokenRefreshResponse, UserResponse},
    error::AppError,
    metrics::{BusinessMetrics, LoginOutcome},
    repositories::Filter,
    uow::RepositoryContext,
};

use super::{require_non_empty, Command, CommandHandler, Query, QueryHandler};

const MIN_PASSWORD_LENGTH: usize = 8;

// commands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterUserCommand {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub display_name: Option<String>,
    pub phone_number: Option<String>,
}
impl Command for RegisterUserCommand {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginCommand {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: String,
}
impl Command for LoginCommand {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenCommand {
    pub refresh: String,
}
impl Command for RefreshTokenCommand {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoutRequest {
    pub refresh: Option<String>,
}

pub struct LogoutCommand {
    pub caller: AuthenticatedUser,
    pub body: LogoutRequest,
}
impl Command for LogoutCommand {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileChanges {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub display_name: Option<String>,
    pub phone_number: Option<String>,
}

pub struct UpdateProfileCommand {
    pub caller: AuthenticatedUser,
    pub body: ProfileChanges,
}
impl Command for UpdateProfileCommand {}

// queries
pub struct GetCurrentUserQuery {
    pub caller: AuthenticatedUser,
}
impl Query for GetCurrentUserQuery {}

async fn find_by_username(repositories: &RepositoryContext, username: &str) -> Result<Option<User>, AppError> {
    let filter = Filter::new().eq("username_lower", User::username_key(username));
    repositories.users.find_one(&filter).await
}

/// `email` must already be lowercased.
async fn find_by_email(repositories: &RepositoryContext, email: &str) -> Result<Option<User>, AppError> {
    repositories.users.find_one(&Filter::new().eq("email", email)).await
}

async fn email_taken(repositories: &RepositoryContext, email: &str, except_user_id: Option<&str>) -> Result<bool, AppError> {
    Ok(find_by_email(repositories, email)
        .await?
        .is_some_and(|u| Some(u.id.as_str()) != except_user_id))
}

/// Usernames may not contain `@`, so a login identifier is never ambiguous
/// between one account's username and another's email.
fn validate_username(username: &str) -> Result<(), AppError> {
    require_non_empty("username", username)?;
    if username.contains('@') {
        return Err(AppError::Validation(String::from("Username may not contain '@'")));
    }
    Ok(())
}

fn duplicate_user(e: AppError) -> AppError {
    match e {
        AppError::Conflict(_) => AppError::Conflict(String::from("A user with that username or email already exists")),
        e => e,
    }
}

fn validate_email(email: &str) -> Result<(), AppError> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(AppError::Validation(String::from("Enter a valid email address"))),
    }
}

/// Creates the configured administrator account unless the username already exists.
pub async fn ensure_admin(repositories: &RepositoryContext, admin: &AdminBootstrap) -> Result<(), AppError> {
    if find_by_username(repositories, &admin.username).await?.is_some() {
        event!(Level::INFO, "Administrator {} already exists", admin.username);
        return Ok(());
    }
    validate_username(&admin.username)?;

    let now = Utc::now();
    repositories
        .users
        .create(User {
            id: new_id(),
            username: admin.username.trim().to_string(),
            username_lower: User::username_key(&admin.username),
            email: admin.email.trim().to_lowercase(),
            password_hash: hash_password(&admin.password)?,
            first_name: String::new(),
            last_name: String::new(),
            display_name: admin.username.clone(),
            phone_number: None,
            role: Role::Admin,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
        .await
        .map_err(duplicate_user)?;

    event!(Level::INFO, "Created administrator {}", admin.username);
    Ok(())
}

// command handlers
#[derive(Clone)]
pub struct RegisterUserCommandHandler {
    repositories: Arc<RepositoryContext>,
    token_service: Arc<TokenService>,
}

impl CommandHandler<RegisterUserCommand, AuthResponse> for RegisterUserCommandHandler {
    async fn handle(&self, input: &RegisterUserCommand) -> Result<AuthResponse, AppError> {
        let username = input.username.trim();
        let email = input.email.trim().to_lowercase();

        validate_username(username)?;
        validate_email(&email)?;
        if input.password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AppError::Validation(format!(
                "Password must contain at least {} characters",
                MIN_PASSWORD_LENGTH
            )));
        }
        if input.password != input.confirm_password {
            return Err(AppError::Validation(String::from("Password fields didn't match")));
        }
        if find_by_username(&self.repositories, username).await?.is_some() {
            return Err(AppError::Conflict(String::from("A user with that username already exists")));
        }
        if email_taken(&self.repositories, &email, None).await? {
            return Err(AppError::Conflict(String::from("A user with that email already exists")));
        }

        let now = Utc::now();
        let user = User {
            id: new_id(),
            username: username.to_string(),
            username_lower: User::username_key(username),
            email,
            password_hash: hash_password(&input.password)?,
            first_name: input.first_name.trim().to_string(),
            last_name: input.last_name.trim().to_string(),
            display_name: input
                .display_name
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .unwrap_or(username)
                .to_string(),
            phone_number: input.phone_number.clone().filter(|p| !p.trim().is_empty()),
            role: Role::Customer,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        let user = self.repositories.users.create(user).await.map_err(duplicate_user)?;
        let tokens = self.token_service.issue_pair(&user)?;
        event!(Level::INFO, "Registered user {}", user.username);

        Ok(AuthResponse {
            user: UserResponse::from(&user),
            access: tokens.access,
            refresh: tokens.refresh,
        })
    }
}

#[derive(Clone)]
pub struct LoginCommandHandler {
    repositories: Arc<RepositoryContext>,
    token_service: Arc<TokenService>,
    metrics: Arc<BusinessMetrics>,
}

impl LoginCommandHandler {
    async fn authenticate(&self, input: &LoginCommand) -> Result<User, AppError> {
        let invalid = || AppError::Unauthorized(String::from("Invalid username or password"));

        let identifier = input
            .email
            .as_deref()
            .or(input.username.as_deref())
            .map(str::trim)
            .filter(|i| !i.is_empty())
            .ok_or_else(|| AppError::Validation(String::from("Username or email is required")))?;

        let user = if identifier.contains('@') {
            find_by_email(&self.repositories, &identifier.to_lowercase()).await?
        } else {
            find_by_username(&self.repositories, identifier).await?
        };

        match user {
            Some(user) if verify_password(&input.password, &user.password_hash) && user.is_active => Ok(user),
            Some(_) => Err(invalid()),
            None => {
                // unknown accounts still pay for a hash
                let _ = hash_password(&input.password);
                Err(invalid())
            }
        }
    }
}

impl CommandHandler<LoginCommand, AuthResponse> for LoginCommandHandler {
    async fn handle(&self, input: &LoginCommand) -> Result<AuthResponse, AppError> {
        let user = match self.authenticate(input).await {
            Ok(user) => user,
            Err(e) => {
                self.metrics.login(LoginOutcome::Failure);
                return Err(e);
            }
        };

        let tokens = self.token_service.issue_pair(&user)?;
        self.metrics.login(LoginOutcome::Success);
        event!(Level::INFO, "User {} logged in", user.username);

        Ok(AuthResponse {
            user: UserResponse::from(&user),
            access: tokens.access,
            refresh: tokens.refresh,
        })
    }
}

#[derive(Clone)]
pub struct RefreshTokenCommandHandler {
    repositories: Arc<RepositoryContext>,
    token_service: Arc<TokenService>,
}

impl CommandHandler<RefreshTokenCommand, TokenRefreshResponse> for RefreshTokenCommandHandler {
    async fn handle(&self, input: &RefreshTokenCommand) -> Result<TokenRefreshResponse, AppError> {
        let claims = self.token_service.verify(&input.refresh, TokenType::Refresh).await?;

        let user = match self.repositories.users.read(&claims.sub).await {
            Ok(user) if user.is_active => user,
            Ok(_) | Err(AppError::NotFound(_)) => return Err(AppError::Unauthorized(String::from("User not found"))),
            Err(e) => return Err(e),
        };

        Ok(TokenRefreshResponse {
            access: self.token_service.issue_access(&user)?,
        })
    }
}

#[derive(Clone)]
pub struct LogoutCommandHandler {
    token_service: Arc<TokenService>,
}

impl CommandHandler<LogoutCommand, MessageResponse> for LogoutCommandHandler {
    async fn handle(&self, input: &LogoutCommand) -> Result<MessageResponse, AppError> {
        if let Some(refresh) = &input.body.refresh {
            // an unusable refresh token expires on its own, logout still succeeds
            match self.token_service.verify(refresh, TokenType::Refresh).await {
                Ok(claims) if claims.sub == input.caller.id => self.token_service.revoke(&claims).await,
                Ok(_) => event!(Level::WARN, "User {} tried to revoke another user's token", input.caller.username),
                Err(e) => event!(Level::DEBUG, "Ignoring refresh token on logout: {}", e),
            }
        }

        Ok(MessageResponse {
            message: String::from("Successfully logged out"),
        })
    }
}

#[derive(Clone)]
pub struct UpdateProfileCommandHandler {
    repositories: Arc<RepositoryContext>,
}

impl CommandHandler<UpdateProfileCommand, UserResponse> for UpdateProfileCommandHandler {
    async fn handle(&self, input: &UpdateProfileCommand) -> Result<UserResponse, AppError> {
        let mut user = self.repositories.users.read(&input.caller.id).await?;
        let changes = &input.body;

        if let Some(email) = &changes.email {
            let email = email.trim().to_lowercase();
            validate_email(&email)?;
            if email_taken(&self.repositories, &email, Some(&user.id)).await? {
                return Err(AppError::Conflict(String::from("A user with that email already exists")));
            }
            user.email = email;
        }
        if let Some(first_name) = &changes.first_name {
            user.first_name = first_name.trim().to_string();
        }
        if let Some(last_name) = &changes.last_name {
            user.last_name = last_name.trim().to_string();
        }
        if let Some(display_name) = &changes.display_name {
            require_non_empty("display_name", display_name)?;
            user.display_name = display_name.trim().to_string();
        }
        if let Some(phone_number) = &changes.phone_number {
            user.phone_number = Some(phone_number.trim().to_string()).filter(|p| !p.is_empty());
        }
        user.updated_at = Utc::now();

        let user = self.repositories.users.update(user).await.map_err(duplicate_user)?;
        Ok(UserResponse::from(&user))
    }
}

// query handlers
#[derive(Clone)]
pub struct GetCurrentUserQueryHandler {
    repositories: Arc<RepositoryContext>,
}

impl QueryHandler<GetCurrentUserQuery, UserResponse> for GetCurrentUserQueryHandler {
    async fn handle(&self, input: &GetCurrentUserQuery) -> Result<UserResponse, AppError> {
        let user = self.repositories.users.read(&input.caller.id).await?;
        Ok(UserResponse::from(&user))
    }
}

pub struct AuthHandlers {
    pub register: RegisterUserCommandHandler,
    pub login: LoginCommandHandler,
    pub refresh: RefreshTokenCommandHandler,
    pub logout: LogoutCommandHandler,
    pub update_profile: UpdateProfileCommandHandler,
    pub current_user: GetCurrentUserQueryHandler,
}

impl AuthHandlers {
    pub fn new(
        repositories: Arc<RepositoryContext>,
        token_service: Arc<TokenService>,
        metrics: Arc<BusinessMetrics>,
    ) -> Self {
        AuthHandlers {
            register: RegisterUserCommandHandler {
                repositories: repositories.clone(),
                token_service: token_service.clone(),
            },
            login: LoginCommandHandler {
                repositories: repositories.clone(),
                token_service: token_service.clone(),
                metrics,
            },
            refresh: RefreshTokenCommandHandler {
                repositories: repositories.clone(),
                token_service: token_service.clone(),
            },
            logout: LogoutCommandHandler { token_service },
            update_profile: UpdateProfileCommandHandler {
                repositories: repositories.clone(),
            },
            current_user: GetCurrentUserQueryHandler { repositories },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cqrs::test_support::{repositories, seed_user};

    fn handlers() -> (AuthHandlers, Arc<RepositoryContext>, Arc<BusinessMetrics>) {
        let repositories = repositories();
        let metrics = Arc::new(BusinessMetrics::new().unwrap());
        let token_service = Arc::new(TokenService::new("test-secret", 300, 3600));
        (
            AuthHandlers::new(repositories.clone(), token_service, metrics.clone()),
            repositories,
            metrics,
        )
    }

    fn registration(username: &str, email: &str) -> RegisterUserCommand {
        RegisterUserCommand {
            username: username.to_string(),
            email: email.to_string(),
            password: String::from("s3cure-pass"),
            confirm_password: String::from("s3cure-pass"),
            first_name: String::from("Sipho"),
            last_name: String::new(),
            display_name: None,
            phone_number: None,
        }
    }

    #[tokio::test]
    async fn register_creates_customer_and_issues_tokens() {
        let (handlers, _, _) = handlers();

        let response = handlers.register.handle(&registration("sipho", "Sipho@Example.com")).await.unwrap();

        assert_eq!(response.user.role, Role::Customer);
        assert_eq!(response.user.email, "sipho@example.com");
        assert_eq!(response.user.display_name, "sipho");
        assert!(!response.access.is_empty() && !response.refresh.is_empty());
    }

    #[tokio::test]
    async fn register_rejects_duplicates_and_mismatched_passwords() {
        let (handlers, _, _) = handlers();
        handlers.register.handle(&registration("sipho", "sipho@example.com")).await.unwrap();

        let same_username = handlers.register.handle(&registration("SIPHO", "other@example.com")).await;
        assert!(matches!(same_username, Err(AppError::Conflict(_))));

        let same_email = handlers.register.handle(&registration("zanele", "SIPHO@example.com")).await;
        assert!(matches!(same_email, Err(AppError::Conflict(_))));

        let mut mismatched = registration("lerato", "lerato@example.com");
        mismatched.confirm_password = String::from("different-pass");
        assert!(matches!(handlers.register.handle(&mismatched).await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn login_accepts_username_or_email_and_counts_outcomes() {
        let (handlers, repositories, metrics) = handlers();
        seed_user(&repositories, "thandi", Role::Vendor).await;

        let by_username = LoginCommand {
            username: Some(String::from("thandi")),
            email: None,
            password: String::from("password123"),
        };
        let response = handlers.login.handle(&by_username).await.unwrap();
        assert_eq!(response.user.username, "thandi");
        assert_eq!(response.user.role, Role::Vendor);

        let by_email = LoginCommand {
            username: None,
            email: Some(String::from("thandi@example.com")),
            password: String::from("password123"),
        };
        assert!(handlers.login.handle(&by_email).await.is_ok());

        let wrong = LoginCommand {
            username: Some(String::from("thandi")),
            email: None,
            password: String::from("nope-nope"),
        };
        assert!(matches!(handlers.login.handle(&wrong).await, Err(AppError::Unauthorized(_))));

        let text = metrics.render();
        assert!(text.contains("reachhub_logins_total{outcome=\"success\"} 2"));
        assert!(text.contains("reachhub_logins_total{outcome=\"failure\"} 1"));
    }

    #[tokio::test]
    async fn usernames_cannot_shadow_another_accounts_email() {
        let (handlers, _, _) = handlers();
        handlers.register.handle(&registration("alice", "alice@example.com")).await.unwrap();

        let shadow = handlers.register.handle(&registration("alice@example.com", "mallory@example.com")).await;
        assert!(matches!(shadow, Err(AppError::Validation(_))));

        for identifier in ["alice@example.com", "ALICE@example.com"] {
            let login = LoginCommand {
                username: Some(identifier.to_string()),
                email: None,
                password: String::from("s3cure-pass"),
            };
            assert_eq!(handlers.login.handle(&login).await.unwrap().user.username, "alice");
        }

        let by_username = LoginCommand {
            username: Some(String::from("Alice")),
            email: None,
            password: String::from("s3cure-pass"),
        };
        assert_eq!(handlers.login.handle(&by_username).await.unwrap().user.username, "alice");
    }

    #[tokio::test]
    async fn inactive_users_cannot_log_in_or_refresh() {
        let (handlers, repositories, _) = handlers();
        let registered = handlers.register.handle(&registration("sipho", "sipho@example.com")).await.unwrap();

        let mut user = repositories.users.read(&registered.user.id).await.unwrap();
        user.is_active = false;
        repositories.users.update(user).await.unwrap();

        let login = LoginCommand {
            username: Some(String::from("sipho")),
            email: None,
            password: String::from("s3cure-pass"),
        };
        assert!(matches!(handlers.login.handle(&login).await, Err(AppError::Unauthorized(_))));

        let refresh = RefreshTokenCommand {
            refresh: registered.refresh,
        };
        assert!(matches!(handlers.refresh.handle(&refresh).await, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn refresh_issues_access_until_logout_revokes_it() {
        let (handlers, _, _) = handlers();
        let registered = handlers.register.handle(&registration("sipho", "sipho@example.com")).await.unwrap();

        let refresh = RefreshTokenCommand {
            refresh: registered.refresh.clone(),
        };
        assert!(handlers.refresh.handle(&refresh).await.is_ok());

        let access_as_refresh = RefreshTokenCommand {
            refresh: registered.access.clone(),
        };
        assert!(matches!(handlers.refresh.handle(&access_as_refresh).await, Err(AppError::Unauthorized(_))));

        let caller = AuthenticatedUser {
            id: registered.user.id.clone(),
            username: registered.user.username.clone(),
            role: registered.user.role,
        };
        handlers
            .logout
            .handle(&LogoutCommand {
                caller,
                body: LogoutRequest {
                    refresh: Some(registered.refresh.clone()),
                },
            })
            .await
            .unwrap();

        assert!(matches!(handlers.refresh.handle(&refresh).await, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn profile_update_rejects_taken_email() {
        let (handlers, repositories, _) = handlers();
        let thandi = seed_user(&repositories, "thandi", Role::Customer).await;
        seed_user(&repositories, "sipho", Role::Customer).await;

        let taken = UpdateProfileCommand {
            caller: thandi.clone(),
            body: ProfileChanges {
                email: Some(String::from("sipho@example.com")),
                ..ProfileChanges::default()
            },
        };
        assert!(matches!(handlers.update_profile.handle(&taken).await, Err(AppError::Conflict(_))));

        let rename = UpdateProfileCommand {
            caller: thandi.clone(),
            body: ProfileChanges {
                display_name: Some(String::from("Mama Thandi")),
                ..ProfileChanges::default()
            },
        };
        assert_eq!(handlers.update_profile.handle(&rename).await.unwrap().display_name, "Mama Thandi");
    }

    #[tokio::test]
    async fn ensure_admin_is_idempotent() {
        let (_, repositories, _) = handlers();
        let admin = AdminBootstrap {
            username: String::from("admin"),
            email: String::from("admin@example.com"),
            password: String::from("admin-pass"),
        };

        ensure_admin(&repositories, &admin).await.unwrap();
        ensure_admin(&repositories, &admin).await.unwrap();

        let admins = repositories.users.find(&Filter::new().eq("role", "Admin")).await.unwrap();
        assert_eq!(admins.len(), 1);
    }
}
