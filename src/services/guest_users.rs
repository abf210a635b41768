use crate::{
    entities::{user, User, UserModel},
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use tracing::{debug, instrument};
use uuid::Uuid;

pub const GUEST_ROLE: &str = "user";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestUpsert {
    pub user: UserModel,
    pub created: bool,
}

/// Lower-cased, trimmed email used as the guest identity key.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Finds the guest by email or creates them.
///
/// An existing user only has their phone refreshed (latest checkout wins);
/// the name recorded on first checkout is kept.
#[instrument(skip(conn, phone))]
pub async fn upsert_guest_user<C: ConnectionTrait>(
    conn: &C,
    email: &str,
    name: &str,
    phone: &str,
) -> Result<GuestUpsert, ServiceError> {
    let email = normalize_email(email);
    if email.is_empty() {
        return Err(ServiceError::ValidationError(
            "Guest email is required".to_string(),
        ));
    }
    let phone = Some(phone.trim().to_string()).filter(|p| !p.is_empty());
    let now = Utc::now();

    if let Some(existing) = User::find()
        .filter(user::Column::Email.eq(email.as_str()))
        .one(conn)
        .await?
    {
        if existing.phone == phone {
            return Ok(GuestUpsert {
                user: existing,
                created: false,
            });
        }
        let mut active: user::ActiveModel = existing.into();
        active.phone = Set(phone);
        active.updated_at = Set(now);
        let user = active.update(conn).await?;
        debug!(user_id = %user.id, "Refreshed guest phone");
        return Ok(GuestUpsert {
            user,
            created: false,
        });
    }

    let name = Some(name.trim()).filter(|n| !n.is_empty()).unwrap_or("Guest");
    let user = user::ActiveModel {
        id: Set(Uuid::new_v4()),
        email: Set(email),
        name: Set(name.to_string()),
        phone: Set(phone),
        role: Set(GUEST_ROLE.to_string()),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await?;
    debug!(user_id = %user.id, "Created guest user");

    Ok(GuestUpsert {
        user,
        created: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use sea_orm::{DatabaseConnection, PaginatorTrait};

    async fn pool() -> DatabaseConnection {
        let pool = db::establish_connection_with_config(&db::DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            ..Default::default()
        })
        .await
        .unwrap();
        db::run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn same_email_reuses_user_and_latest_phone_wins() {
        let db = pool().await;

        let first = upsert_guest_user(&db, "Ana@Example.com ", "Ana", "111 111 1111")
            .await
            .unwrap();
        let second = upsert_guest_user(&db, "ana@example.com", "Someone Else", "222 222 2222")
            .await
            .unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.user.id, second.user.id);
        assert_eq!(second.user.name, "Ana");
        assert_eq!(second.user.phone.as_deref(), Some("222 222 2222"));
        assert_eq!(User::find().count(&db).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn blank_name_defaults_to_guest() {
        let db = pool().await;
        let upsert = upsert_guest_user(&db, "b@example.com", "  ", "5551234567")
            .await
            .unwrap();
        assert_eq!(upsert.user.name, "Guest");
        assert_eq!(upsert.user.email, "b@example.com");
    }

    #[tokio::test]
    async fn blank_email_is_rejected() {
        let db = pool().await;
        assert!(matches!(
            upsert_guest_user(&db, " ", "Ana", "5551234567").await,
            Err(ServiceError::ValidationError(_))
        ));
    }
}
