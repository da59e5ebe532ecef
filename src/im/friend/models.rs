//! 好友关系模型定义

use crate::im::directory::UserProfile;
use serde::{Deserialize, Serialize};

/// 好友关系状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FriendshipStatus {
    Pending,
    Accepted,
}

impl FriendshipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FriendshipStatus::Pending => "pending",
            FriendshipStatus::Accepted => "accepted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(FriendshipStatus::Pending),
            "accepted" => Some(FriendshipStatus::Accepted),
            _ => None,
        }
    }
}

/// 好友关系记录：每个无序用户对最多一条
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Friendship {
    pub id: String,
    pub from_user: String,
    pub to_user: String,
    pub status: FriendshipStatus,
    pub created_at: i64,
    pub accepted_at: Option<i64>,
}

impl Friendship {
    pub fn involves(&self, user_id: &str) -> bool {
        self.from_user == user_id || self.to_user == user_id
    }

    /// 关系中的另一方
    pub fn other(&self, user_id: &str) -> &str {
        if self.from_user == user_id {
            &self.to_user
        } else {
            &self.from_user
        }
    }
}

/// 从某个用户视角看与另一个用户的关系
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationStatus {
    None,
    Friends,
    RequestSent,
    RequestReceived,
}

/// 好友列表项
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendEntry {
    pub friendship_id: String,
    pub user_id: String,
    pub profile: Option<UserProfile>,
    pub since: i64,
}

/// 某个用户的好友关系总览（推送订阅的结果集）
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendshipOverview {
    pub friends: Vec<Friendship>,
    pub incoming: Vec<Friendship>,
    pub outgoing: Vec<Friendship>,
}
