//! Diesel table definitions for the PostgreSQL schema.
//!
//! These definitions must match the migrations under `backend/migrations`.
//! `diesel print-schema` regenerates them from a live database.

diesel::table! {
    /// Registered accounts.
    ///
    /// `username` is unique; `email` is unique case-insensitively through an
    /// index on `lower(email)`.
    users (id) {
        id -> Int8,
        username -> Varchar,
        email -> Varchar,
        first_name -> Varchar,
        last_name -> Varchar,
        /// Encoded `pbkdf2_sha256$<iterations>$<salt>$<hash>` string.
        password -> Varchar,
        is_staff -> Bool,
        is_superuser -> Bool,
        is_active -> Bool,
        date_joined -> Timestamptz,
    }
}

diesel::table! {
    /// Refresh token sessions. Only the SHA-256 fingerprint of a token is
    /// stored.
    refresh_sessions (id) {
        id -> Uuid,
        user_id -> Int8,
        token_hash -> Varchar,
        user_agent -> Varchar,
        ip_address -> Nullable<Varchar>,
        created_at -> Timestamptz,
        expires_at -> Timestamptz,
        revoked_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    todos (id) {
        id -> Int8,
        owner_id -> Int8,
        title -> Varchar,
        description -> Text,
        completed -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::joinable!(refresh_sessions -> users (user_id));
diesel::joinable!(todos -> users (owner_id));

diesel::allow_tables_to_appear_in_same_query!(users, refresh_sessions, todos);
