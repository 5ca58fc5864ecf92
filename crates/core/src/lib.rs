#![forbid(unsafe_code)]

pub mod branching;

pub mod ids {
    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    pub struct SessionId(String);

    impl SessionId {
        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn try_new(value: impl Into<String>) -> Result<Self, IdError> {
            let value = value.into();
            validate_id(&value)?;
            Ok(Self(value))
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    pub struct MessageId(String);

    impl MessageId {
        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn try_new(value: impl Into<String>) -> Result<Self, IdError> {
            let value = value.into();
            validate_id(&value)?;
            Ok(Self(value))
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum IdError {
        Empty,
        TooLong,
        InvalidFirstChar,
        InvalidChar { ch: char, index: usize },
    }

    impl std::fmt::Display for IdError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::Empty => write!(f, "identifier is empty"),
                Self::TooLong => write!(f, "identifier exceeds 128 chars"),
                Self::InvalidFirstChar => write!(f, "identifier must start alphanumeric"),
                Self::InvalidChar { ch, index } => {
                    write!(f, "invalid char {ch:?} at index {index}")
                }
            }
        }
    }

    impl std::error::Error for IdError {}

    fn validate_id(value: &str) -> Result<(), IdError> {
        if value.is_empty() {
            return Err(IdError::Empty);
        }
        if value.len() > 128 {
            return Err(IdError::TooLong);
        }
        let mut chars = value.chars();
        let Some(first) = chars.next() else {
            return Err(IdError::Empty);
        };
        if !first.is_ascii_alphanumeric() {
            return Err(IdError::InvalidFirstChar);
        }
        for (index, ch) in value.chars().enumerate() {
            if index == 0 {
                continue;
            }
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '/' | '-' | ':') {
                continue;
            }
            return Err(IdError::InvalidChar { ch, index });
        }
        Ok(())
    }
}

pub mod model {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum MessageRole {
        User,
        Assistant,
    }

    impl MessageRole {
        pub fn as_str(self) -> &'static str {
            match self {
                MessageRole::User => "USER",
                MessageRole::Assistant => "ASSISTANT",
            }
        }

        pub fn parse(value: &str) -> Option<Self> {
            match value {
                "USER" => Some(MessageRole::User),
                "ASSISTANT" => Some(MessageRole::Assistant),
                _ => None,
            }
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum SnapshotType {
        LiveEdit,
        Migration,
    }

    impl SnapshotType {
        pub fn as_str(self) -> &'static str {
            match self {
                SnapshotType::LiveEdit => "LIVE_EDIT",
                SnapshotType::Migration => "MIGRATION",
            }
        }

        pub fn parse(value: &str) -> Option<Self> {
            match value {
                "LIVE_EDIT" => Some(SnapshotType::LiveEdit),
                "MIGRATION" => Some(SnapshotType::Migration),
                _ => None,
            }
        }
    }
}
