use crate::config::Config;
use crate::model::actor::Actor;
use crate::{auth::jwt::verify_token, model::role::Role};
use actix_web::{FromRequest, HttpMessage, HttpRequest, dev::Payload, error::ErrorUnauthorized, web::Data};
use futures::future::{Ready, ready};

/// The caller behind a bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: u64,
    pub username: String,
    pub role: Role,
    pub project_ids: Vec<i64>,
}

impl FromRequest for AuthUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        // Already verified by the middleware
        if let Some(user) = req.extensions().get::<AuthUser>() {
            return ready(Ok(user.clone()));
        }

        let token = match req
            .headers()
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
        {
            Some(t) => t,
            None => return ready(Err(ErrorUnauthorized("Missing token"))),
        };

        let config = match req.app_data::<Data<Config>>() {
            Some(c) => c,
            None => {
                return ready(Err(
                    actix_web::error::ErrorInternalServerError("Config missing"),
                ));
            }
        };

        let claims = match verify_token(token, &config.jwt_secret) {
            Ok(c) => c,
            Err(_) => return ready(Err(ErrorUnauthorized("Invalid token"))),
        };

        // System never signs in over HTTP
        let role = match Role::from_id(claims.role) {
            Some(r) if r != Role::System => r,
            _ => return ready(Err(ErrorUnauthorized("Invalid role"))),
        };

        ready(Ok(AuthUser {
            user_id: claims.user_id,
            username: claims.sub,
            role,
            project_ids: claims.project_ids,
        }))
    }
}

impl AuthUser {
    pub fn require_mutator(&self) -> actix_web::Result<()> {
        if self.role.can_mutate() {
            Ok(())
        } else {
            Err(actix_web::error::ErrorForbidden("Admin/SiteManager only"))
        }
    }

    pub fn actor(&self) -> Actor {
        Actor::new(self.user_id, self.username.clone(), self.role).with_projects(self.project_ids.clone())
    }
}
