//! Read-side view of the externally managed user directory.
//!
//! Users are provisioned by the identity provider (mirrored here from the
//! `directory.users` config section at startup). The service only looks them
//! up and checks role capabilities; it never authenticates anyone.

use anyhow::Result;
use libsql::Connection;

use crate::config::DirectoryUser;
use crate::model::{Role, User};

pub struct Directory<'a> {
    conn: &'a Connection,
}

impl<'a> Directory<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Inserts or refreshes a provisioned user. Existing rows keep their
    /// registration date.
    pub async fn provision(&self, user: &DirectoryUser) -> Result<()> {
        let query = r#"
            INSERT INTO users (id, full_name, email, role, department)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                full_name = excluded.full_name,
                email = excluded.email,
                role = excluded.role,
                department = excluded.department
        "#;

        self.conn
            .execute(
                query,
                libsql::params![
                    user.id.as_str(),
                    user.full_name.as_str(),
                    user.email.clone(),
                    user.role.as_str(),
                    user.department.clone()
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<User>> {
        let query = r#"
            SELECT id, full_name, email, role, department, date_registered
            FROM users WHERE id = ?
        "#;

        let mut rows = self.conn.query(query, libsql::params![id]).await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(self.row_to_user(&row)?))
        } else {
            Ok(None)
        }
    }

    /// Users that can appear as borrowers in checkout forms.
    pub async fn list_borrowers(&self) -> Result<Vec<User>> {
        let query = r#"
            SELECT id, full_name, email, role, department, date_registered
            FROM users
            WHERE role IN ('student', 'staff', 'borrower')
            ORDER BY full_name ASC
        "#;

        let mut rows = self.conn.query(query, ()).await?;
        let mut users = Vec::new();

        while let Some(row) = rows.next().await? {
            users.push(self.row_to_user(&row)?);
        }

        Ok(users)
    }

    fn row_to_user(&self, row: &libsql::Row) -> Result<User> {
        let role_str: String = row.get(3)?;
        let role = Role::from_str(&role_str).ok_or_else(|| anyhow::anyhow!("Invalid role: {}", role_str))?;

        Ok(User {
            id: row.get(0)?,
            full_name: row.get(1)?,
            email: row.get(2)?,
            role,
            department: row.get(4)?,
            date_registered: row.get(5)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn user(id: &str, name: &str, role: Role) -> DirectoryUser {
        DirectoryUser {
            id: id.to_string(),
            full_name: name.to_string(),
            email: None,
            role,
            department: None,
        }
    }

    #[tokio::test]
    async fn provision_is_idempotent_and_updates_role() {
        let db = Database::open_in_memory().await.unwrap();
        let dir = Directory::new(db.connection());

        dir.provision(&user("u1", "Una", Role::Student)).await.unwrap();
        dir.provision(&user("u1", "Una", Role::Staff)).await.unwrap();

        let u = dir.get_user("u1").await.unwrap().unwrap();
        assert_eq!(u.role, Role::Staff);
        assert!(dir.get_user("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn borrowers_exclude_admins_and_sort_by_name() {
        let db = Database::open_in_memory().await.unwrap();
        let dir = Directory::new(db.connection());

        dir.provision(&user("a", "Zed Admin", Role::Admin)).await.unwrap();
        dir.provision(&user("b", "Yara", Role::Student)).await.unwrap();
        dir.provision(&user("c", "Abe", Role::Staff)).await.unwrap();

        let names: Vec<String> = dir
            .list_borrowers()
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.full_name)
            .collect();
        assert_eq!(names, vec!["Abe", "Yara"]);
    }
}
