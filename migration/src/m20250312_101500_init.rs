use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();

        let statement = r#"
        create table "workspace" (
            "id" serial primary key,
            "created_at" timestamptz(0) not null default now(),
            "name" varchar(255) not null,
            "timezone" varchar(64) not null default 'UTC',
            "tracking_enabled" boolean not null default true,
            "secret_key" varchar(255) not null
        );

        create table "email_integration" (
            "id" serial primary key,
            "created_at" timestamptz(0) not null default now(),
            "workspace_id" int not null,
            "name" varchar(255) not null,
            "kind" varchar(16) not null,
            "settings" jsonb not null,
            "requests_per_minute" int not null default 60,
            "is_default" boolean not null default false
        );

        create table "template" (
            "id" serial primary key,
            "created_at" timestamptz(0) not null default now(),
            "updated_at" timestamptz(0) not null default now(),
            "workspace_id" int not null,
            "name" varchar(255) not null,
            "subject" varchar(998) not null,
            "body_html" text not null,
            "body_text" text null
        );

        create table "contact" (
            "workspace_id" int not null,
            "email" varchar(255) not null,
            "created_at" timestamptz(0) not null default now(),
            "updated_at" timestamptz(0) not null default now(),
            "external_id" varchar(255) null,
            "first_name" varchar(255) null,
            "last_name" varchar(255) null,
            "country" varchar(255) null,
            "language" varchar(32) null,
            "custom_string_1" varchar(255) null,
            "custom_string_2" varchar(255) null,
            "custom_string_3" varchar(255) null,
            "custom_string_4" varchar(255) null,
            "custom_string_5" varchar(255) null,
            "custom_number_1" double precision null,
            "custom_number_2" double precision null,
            "custom_number_3" double precision null,
            "custom_number_4" double precision null,
            "custom_number_5" double precision null,
            "custom_datetime_1" timestamptz(0) null,
            "custom_datetime_2" timestamptz(0) null,
            "custom_datetime_3" timestamptz(0) null,
            "custom_datetime_4" timestamptz(0) null,
            "custom_datetime_5" timestamptz(0) null,
            "custom_json_1" jsonb null,
            "custom_json_2" jsonb null,
            "custom_json_3" jsonb null,
            "custom_json_4" jsonb null,
            "custom_json_5" jsonb null,
            constraint "contact_pkey" primary key ("workspace_id", "email")
        );

        comment on column "contact"."email" is 'contacts are identified by email within a workspace';

        create index "contact_created_at_email_index"
            on "contact" ("workspace_id", "created_at", "email");

        create table "contact_list" (
            "workspace_id" int not null,
            "email" varchar(255) not null,
            "list_id" int not null,
            "status" varchar(16) not null default 'active',
            "created_at" timestamptz(0) not null default now(),
            "updated_at" timestamptz(0) not null default now(),
            constraint "contact_list_pkey" primary key ("workspace_id", "email", "list_id")
        );

        create index "contact_list_list_id_status_index"
            on "contact_list" ("workspace_id", "list_id", "status");

        create table "contact_event" (
            "id" bigserial primary key,
            "workspace_id" int not null,
            "email" varchar(255) not null,
            "kind" varchar(64) not null,
            "occurred_at" timestamptz(0) not null default now(),
            "payload" jsonb not null default '{}'
        );

        create index "contact_event_email_kind_occurred_at_index"
            on "contact_event" ("workspace_id", "email", "kind", "occurred_at");

        create table "broadcast" (
            "id" serial primary key,
            "created_at" timestamptz(0) not null default now(),
            "updated_at" timestamptz(0) not null default now(),
            "workspace_id" int not null,
            "name" varchar(255) not null,
            "status" varchar(24) not null default 'draft',
            "audience" jsonb not null,
            "schedule" jsonb null,
            "template_id" int null,
            "test_settings" jsonb null,
            "winning_template_id" int null,
            "email_integration_id" int null,
            "tracking_enabled" boolean not null default true
        );

        create table "task" (
            "id" serial primary key,
            "created_at" timestamptz(0) not null default now(),
            "updated_at" timestamptz(0) not null default now(),
            "workspace_id" int not null,
            "kind" varchar(32) not null,
            "status" varchar(16) not null default 'pending',
            "progress" int not null default 0,
            "state" jsonb not null,
            "max_runtime_seconds" int not null default 300,
            "next_run_after" timestamptz(0) not null default now(),
            "last_run_at" timestamptz(0) null,
            "broadcast_id" int null,
            "segment_id" int null,
            "error" text null
        );

        create index "task_status_next_run_after_index"
            on "task" ("status", "next_run_after");

        create table "message_history" (
            "id" uuid primary key,
            "workspace_id" int not null,
            "broadcast_id" int null,
            "template_id" int not null,
            "recipient_email" varchar(255) not null,
            "status" varchar(16) not null,
            "sent_at" timestamptz(0) not null default now(),
            "delivered_at" timestamptz(0) null,
            "opened_at" timestamptz(0) null,
            "clicked_at" timestamptz(0) null,
            "bounced_at" timestamptz(0) null,
            "error" text null
        );

        alter table
            "message_history"
        add
            constraint "message_history_broadcast_recipient_template_unique"
            unique ("broadcast_id", "recipient_email", "template_id");

        create index "message_history_broadcast_id_index"
            on "message_history" ("broadcast_id");

        create table "segment" (
            "id" serial primary key,
            "created_at" timestamptz(0) not null default now(),
            "updated_at" timestamptz(0) not null default now(),
            "workspace_id" int not null,
            "name" varchar(255) not null,
            "tree" jsonb not null,
            "timezone" varchar(64) not null default 'UTC',
            "status" varchar(16) not null default 'building',
            "users_count" bigint not null default 0,
            "version" int not null default 0,
            "recompute_after" timestamptz(0) null,
            "error" text null
        );

        create index "segment_recompute_after_index"
            on "segment" ("recompute_after") where "recompute_after" is not null;

        create table "segment_membership" (
            "segment_id" int not null,
            "email" varchar(255) not null,
            "workspace_id" int not null,
            "version" int not null,
            "matched_at" timestamptz(0) not null default now(),
            constraint "segment_membership_pkey" primary key ("segment_id", "email")
        );

        create index "segment_membership_version_index"
            on "segment_membership" ("segment_id", "version");

        create table "webhook_subscription" (
            "id" serial primary key,
            "created_at" timestamptz(0) not null default now(),
            "workspace_id" int not null,
            "url" varchar(2048) not null,
            "secret" varchar(255) not null,
            "event_types" jsonb not null default '[]',
            "filters" jsonb null,
            "enabled" boolean not null default true
        );

        alter table
            "email_integration"
        add
            constraint "email_integration_workspace_id_foreign" foreign key ("workspace_id") references "workspace" ("id") on update cascade on delete cascade;

        alter table
            "template"
        add
            constraint "template_workspace_id_foreign" foreign key ("workspace_id") references "workspace" ("id") on update cascade on delete cascade;

        alter table
            "contact"
        add
            constraint "contact_workspace_id_foreign" foreign key ("workspace_id") references "workspace" ("id") on update cascade on delete cascade;

        alter table
            "broadcast"
        add
            constraint "broadcast_workspace_id_foreign" foreign key ("workspace_id") references "workspace" ("id") on update cascade on delete cascade;

        alter table
            "task"
        add
            constraint "task_workspace_id_foreign" foreign key ("workspace_id") references "workspace" ("id") on update cascade on delete cascade;

        alter table
            "task"
        add
            constraint "task_broadcast_id_foreign" foreign key ("broadcast_id") references "broadcast" ("id") on update cascade on delete cascade;

        alter table
            "task"
        add
            constraint "task_segment_id_foreign" foreign key ("segment_id") references "segment" ("id") on update cascade on delete cascade;

        alter table
            "message_history"
        add
            constraint "message_history_broadcast_id_foreign" foreign key ("broadcast_id") references "broadcast" ("id") on update cascade on delete
        set
            null;

        alter table
            "segment"
        add
            constraint "segment_workspace_id_foreign" foreign key ("workspace_id") references "workspace" ("id") on update cascade on delete cascade;

        alter table
            "segment_membership"
        add
            constraint "segment_membership_segment_id_foreign" foreign key ("segment_id") references "segment" ("id") on update cascade on delete cascade;

        alter table
            "webhook_subscription"
        add
            constraint "webhook_subscription_workspace_id_foreign" foreign key ("workspace_id") references "workspace" ("id") on update cascade on delete cascade;
        "#;

        db.execute_unprepared(statement).await?;

        Ok(())
    }

    async fn down(&self, _manager: &SchemaManager) -> Result<(), DbErr> {
        Err(DbErr::Custom(String::from("cannot be reverted")))
    }
}
