use serde::{Deserialize, Serialize};

/// Permission bit flags OR-ed together into a role's `permissions` mask.
pub mod permission {
    pub const FOLLOW: u32 = 0x01;
    pub const COMMENT: u32 = 0x02;
    pub const WRITE: u32 = 0x04;
    pub const MODERATE: u32 = 0x08;
    pub const ADMIN: u32 = 0x10;
    pub const LIKE: u32 = 0x20;
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub is_default: bool,
    pub permissions: u32,
}

impl Role {
    pub fn has_permission(&self, perm: u32) -> bool {
        self.permissions & perm == perm
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub confirmed: bool,
    pub role_id: i64,
    pub role_name: String,
    pub permissions: u32,
    pub name: Option<String>,
    pub location: Option<String>,
    pub about_me: Option<String>,
    pub member_since: String,
    pub last_seen: String,
    pub avatar_big: Option<String>,
    pub avatar_small: Option<String>,
}

impl User {
    pub fn can(&self, perm: u32) -> bool {
        self.permissions & perm == perm
    }

    pub fn is_administrator(&self) -> bool {
        self.can(permission::ADMIN)
    }
}

/// Permission check that also covers the anonymous (not logged in) case.
pub fn can(user: Option<&User>, perm: u32) -> bool {
    user.map_or(false, |u| u.can(perm))
}

#[derive(Debug, Serialize, Clone)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub body_html: String,
    pub abstract_text: String,
    pub created_at: String,
    pub author_id: i64,
    pub author_username: String,
    pub author_avatar: Option<String>,
    pub view_count: i64,
    pub like_count: i64,
    pub comment_count: i64,
}

#[derive(Debug, Serialize, Clone)]
pub struct Comment {
    pub id: i64,
    pub body: String,
    pub body_html: String,
    pub created_at: String,
    pub disabled: bool,
    pub author_id: i64,
    pub author_username: String,
    pub author_avatar: Option<String>,
    pub post_id: i64,
}

/// One row in a follower / followed-by listing.
#[derive(Debug, Serialize, Clone)]
pub struct FollowEntry {
    pub username: String,
    pub avatar_small: Option<String>,
    pub since: String,
}

/// A single page of results plus the pagination chrome the templates need.
#[derive(Debug, Serialize, Clone)]
pub struct Page<T: Serialize> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
    pub total_pages: u32,
    pub has_prev: bool,
    pub has_next: bool,
}

impl<T: Serialize> Page<T> {
    pub fn new(items: Vec<T>, page: u32, per_page: u32, total: i64) -> Self {
        let total_pages = if total <= 0 {
            1
        } else {
            ((total as u64 + per_page as u64 - 1) / per_page as u64) as u32
        };
        Page {
            items,
            page,
            per_page,
            total,
            total_pages,
            has_prev: page > 1,
            has_next: page < total_pages,
        }
    }
}

pub mod db_operations;

#[cfg(test)]
mod tests {
    use super::*;

    fn role(permissions: u32) -> Role {
        Role { id: 1, name: "test".to_string(), is_default: false, permissions }
    }

    fn user(permissions: u32) -> User {
        User {
            id: 1,
            email: "a@example.com".to_string(),
            username: "a".to_string(),
            confirmed: true,
            role_id: 1,
            role_name: "test".to_string(),
            permissions,
            name: None,
            location: None,
            about_me: None,
            member_since: String::new(),
            last_seen: String::new(),
            avatar_big: None,
            avatar_small: None,
        }
    }

    #[test]
    fn role_permission_check_is_containment() {
        let moderator = role(
            permission::FOLLOW
                | permission::COMMENT
                | permission::WRITE
                | permission::LIKE
                | permission::MODERATE,
        );
        assert!(moderator.has_permission(permission::MODERATE));
        assert!(moderator.has_permission(permission::FOLLOW | permission::COMMENT));
        assert!(!moderator.has_permission(permission::ADMIN));
    }

    #[test]
    fn permission_checks_are_monotonic_across_roles() {
        let user_mask =
            permission::FOLLOW | permission::COMMENT | permission::WRITE | permission::LIKE;
        let moderator_mask = user_mask | permission::MODERATE;
        let admin_mask = moderator_mask | permission::ADMIN;

        let all_perms = [
            permission::FOLLOW,
            permission::COMMENT,
            permission::WRITE,
            permission::MODERATE,
            permission::ADMIN,
            permission::LIKE,
        ];
        for perm in all_perms {
            // Anything an ordinary user can do, a moderator can do; anything a
            // moderator can do, an administrator can do.
            if user(user_mask).can(perm) {
                assert!(user(moderator_mask).can(perm));
            }
            if user(moderator_mask).can(perm) {
                assert!(user(admin_mask).can(perm));
            }
        }
        assert!(user(admin_mask).is_administrator());
        assert!(!user(moderator_mask).is_administrator());
    }

    #[test]
    fn anonymous_fails_every_permission_check() {
        for perm in [
            permission::FOLLOW,
            permission::COMMENT,
            permission::WRITE,
            permission::MODERATE,
            permission::ADMIN,
            permission::LIKE,
        ] {
            assert!(!can(None, perm));
        }
    }

    #[test]
    fn page_math_handles_partial_last_page() {
        let page: Page<i32> = Page::new(vec![1, 2, 3], 2, 10, 23);
        assert_eq!(page.total_pages, 3);
        assert!(page.has_prev);
        assert!(page.has_next);

        let last: Page<i32> = Page::new(vec![], 3, 10, 23);
        assert!(!last.has_next);

        let empty: Page<i32> = Page::new(vec![], 1, 10, 0);
        assert_eq!(empty.total_pages, 1);
        assert!(!empty.has_prev && !empty.has_next);
    }
}
