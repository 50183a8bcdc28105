use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use taskify::config::{ClientConfig, ConfigError};
use taskify::forms::card::CardDraft;
use taskify::forms::password::ChangePasswordForm;
use taskify::net::types::{DashboardInput, EntityId};
use taskify::session::{FileTokenStore, Session, SessionError};
use taskify::state::board::BoardView;
use taskify::state::column::ColumnView;
use taskify::state::comments::CommentsView;
use taskify::state::dashboards::{DashboardEditor, DashboardsView};
use taskify::state::invites::{InviteRecordsView, ReceivedInvitationsView};
use taskify::state::members::MembersView;
use taskify::state::{Capabilities, ListPhase, ListSource, ListView, SyncError, ViewScope};
use taskify::{ApiClient, ApiError};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("request failed: {0}")]
    Api(#[from] ApiError),
    #[error("{0}")]
    Sync(#[from] SyncError),
    #[error("not signed in; run `taskify login` first")]
    NotSignedIn,
    #[error("{0}")]
    Load(String),
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: EntityId },
    #[error("cannot read image {path}: {source}")]
    Image { path: PathBuf, source: std::io::Error },
}

#[derive(Parser, Debug)]
#[command(name = "taskify", about = "Taskify dashboards from the command line")]
struct Cli {
    #[arg(long, env = "TASKIFY_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "TASKIFY_TEAM_ID")]
    team_id: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "TASKIFY_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Logout,
    Me,
    Password(PasswordArgs),
    Dashboards(DashboardsCommand),
    Invites(InvitesCommand),
    Members(MembersCommand),
    Columns(ColumnsCommand),
    Cards(CardsCommand),
    Comments(CommentsCommand),
}

#[derive(Args, Debug)]
struct PasswordArgs {
    #[arg(long)]
    current: String,
    #[arg(long = "new")]
    new_password: String,
    #[arg(long)]
    confirm: String,
}

#[derive(Args, Debug)]
struct DashboardsCommand {
    #[command(subcommand)]
    command: DashboardsSubcommand,
}

#[derive(Subcommand, Debug)]
enum DashboardsSubcommand {
    List {
        #[arg(long, default_value_t = 1)]
        page: usize,
    },
    Create {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "#7AC555")]
        color: String,
    },
    Rename {
        dashboard_id: EntityId,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "#7AC555")]
        color: String,
    },
    Delete {
        dashboard_id: EntityId,
    },
    Leave {
        dashboard_id: EntityId,
    },
}

#[derive(Args, Debug)]
struct InvitesCommand {
    #[command(subcommand)]
    command: InvitesSubcommand,
}

#[derive(Subcommand, Debug)]
enum InvitesSubcommand {
    List {
        dashboard_id: EntityId,
        #[arg(long, default_value_t = 1)]
        page: usize,
    },
    Send {
        dashboard_id: EntityId,
        email: String,
    },
    Cancel {
        dashboard_id: EntityId,
        invitation_id: EntityId,
    },
    /// Invitations addressed to you.
    Received,
    Respond {
        invitation_id: EntityId,
        #[arg(long, conflicts_with = "decline", required_unless_present = "decline")]
        accept: bool,
        #[arg(long)]
        decline: bool,
    },
}

#[derive(Args, Debug)]
struct MembersCommand {
    #[command(subcommand)]
    command: MembersSubcommand,
}

#[derive(Subcommand, Debug)]
enum MembersSubcommand {
    List {
        dashboard_id: EntityId,
        #[arg(long, default_value_t = 1)]
        page: usize,
    },
    Remove {
        dashboard_id: EntityId,
        member_id: EntityId,
    },
}

#[derive(Args, Debug)]
struct ColumnsCommand {
    #[command(subcommand)]
    command: ColumnsSubcommand,
}

#[derive(Subcommand, Debug)]
enum ColumnsSubcommand {
    List {
        dashboard_id: EntityId,
    },
    Create {
        dashboard_id: EntityId,
        title: String,
    },
    Rename {
        dashboard_id: EntityId,
        column_id: EntityId,
        title: String,
    },
    Delete {
        dashboard_id: EntityId,
        column_id: EntityId,
    },
}

#[derive(Args, Debug)]
struct CardsCommand {
    #[command(subcommand)]
    command: CardsSubcommand,
}

#[derive(Subcommand, Debug)]
enum CardsSubcommand {
    List {
        dashboard_id: EntityId,
        column_id: EntityId,
    },
    Create {
        dashboard_id: EntityId,
        column_id: EntityId,
        #[command(flatten)]
        card: CardArgs,
    },
    Delete {
        dashboard_id: EntityId,
        column_id: EntityId,
        card_id: EntityId,
    },
}

#[derive(Args, Debug)]
struct CardArgs {
    /// Member nickname or email.
    #[arg(long)]
    assignee: String,
    #[arg(long)]
    title: String,
    #[arg(long)]
    description: String,
    /// `YYYY-MM-DD HH:mm` or `YYYY.MM.DD HH:mm`.
    #[arg(long)]
    deadline: String,
    #[arg(long = "tag")]
    tags: Vec<String>,
    /// Image file uploaded and attached to the card.
    #[arg(long)]
    image: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct CommentsCommand {
    #[command(subcommand)]
    command: CommentsSubcommand,
}

#[derive(Subcommand, Debug)]
enum CommentsSubcommand {
    List { card_id: EntityId },
    Add { card_id: EntityId, content: String },
}

struct CliContext {
    config: ClientConfig,
    api: ApiClient,
    store: FileTokenStore,
}

impl CliContext {
    fn session(&self) -> Result<Session, CliError> {
        Session::restore(&self.store)?.ok_or(CliError::NotSignedIn)
    }

    /// Session with the user attached; views that check ownership need it.
    async fn session_with_user(&self) -> Result<Session, CliError> {
        Ok(self.session()?.refresh_user(&self.api).await?)
    }

    /// What the signed-in user may do on `dashboard_id`, under the configured
    /// guest policy.
    async fn capabilities(&self, session: &Session, dashboard_id: EntityId) -> Result<Capabilities, CliError> {
        let mut editor = DashboardEditor::new(self.api.clone(), session.clone(), dashboard_id);
        editor.load(&self.config.guest).await?;
        Ok(editor.capabilities())
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let config = ClientConfig::from_env()?.with_overrides(cli.base_url.as_deref(), cli.team_id.as_deref())?;
    debug!(root = %config.api_root(), "using api");
    let ctx = CliContext { api: ApiClient::new(&config)?, store: FileTokenStore::new(&config.token_path), config };

    match cli.command {
        Command::Login { email, password } => {
            let session = Session::sign_in(&ctx.api, &ctx.store, &email, &password).await?;
            if let Some(user) = session.user() {
                println!("signed in as {} <{}>", user.nickname, user.email);
            }
            Ok(())
        }
        Command::Logout => {
            if let Some(session) = Session::restore(&ctx.store)? {
                session.sign_out(&ctx.store)?;
            }
            println!("signed out");
            Ok(())
        }
        Command::Me => {
            let session = ctx.session_with_user().await?;
            if let Some(user) = session.user() {
                println!("{}\t{}\t{}", user.id, user.nickname, user.email);
            }
            Ok(())
        }
        Command::Password(args) => run_password(&ctx, args).await,
        Command::Dashboards(cmd) => run_dashboards(&ctx, cmd.command).await,
        Command::Invites(cmd) => run_invites(&ctx, cmd.command).await,
        Command::Members(cmd) => run_members(&ctx, cmd.command).await,
        Command::Columns(cmd) => run_columns(&ctx, cmd.command).await,
        Command::Cards(cmd) => run_cards(&ctx, cmd.command).await,
        Command::Comments(cmd) => run_comments(&ctx, cmd.command).await,
    }
}

async fn run_password(ctx: &CliContext, args: PasswordArgs) -> Result<(), CliError> {
    let session = ctx.session()?;
    let mut form = ChangePasswordForm::default();
    form.set_current(args.current);
    form.set_new_password(args.new_password);
    form.set_confirm(args.confirm);
    let message = form.submit(&ctx.api, &session, &ViewScope::new()).await?;
    println!("{message}");
    Ok(())
}

async fn run_dashboards(ctx: &CliContext, command: DashboardsSubcommand) -> Result<(), CliError> {
    let session = ctx.session_with_user().await?;
    let mut view = DashboardsView::new(ctx.api.clone(), session.clone(), ctx.config.guest.clone());
    match command {
        DashboardsSubcommand::List { page } => {
            ensure_loaded(view.load().await, view.list())?;
            view.list_mut().go_to(page);
            print_page(view.list(), |d| {
                let owner = if d.created_by_me { " (owner)" } else { "" };
                format!("{}\t{}\t{}{owner}", d.id, d.color, d.title)
            });
        }
        DashboardsSubcommand::Create { title, color } => {
            ensure_loaded(view.load().await, view.list())?;
            view.create(DashboardInput { title, color }).await?;
            settle(view.list_mut()).await;
            if let Some(created) = view.list().items().last() {
                println!("created dashboard {}", created.id);
            }
        }
        DashboardsSubcommand::Rename { dashboard_id, title, color } => {
            let mut editor = DashboardEditor::new(ctx.api.clone(), session, dashboard_id);
            editor.load(&ctx.config.guest).await?;
            let renamed = editor.rename(DashboardInput { title, color }).await?;
            println!("renamed dashboard {} to {}", renamed.id, renamed.title);
        }
        DashboardsSubcommand::Delete { dashboard_id } => {
            ensure_loaded(view.load().await, view.list())?;
            view.delete(dashboard_id).await?;
            settle(view.list_mut()).await;
            println!("deleted dashboard {dashboard_id}");
        }
        DashboardsSubcommand::Leave { dashboard_id } => {
            ensure_loaded(view.load().await, view.list())?;
            view.leave(dashboard_id).await?;
            settle(view.list_mut()).await;
            println!("left dashboard {dashboard_id}");
        }
    }
    Ok(())
}

async fn run_invites(ctx: &CliContext, command: InvitesSubcommand) -> Result<(), CliError> {
    let session = ctx.session_with_user().await?;
    match command {
        InvitesSubcommand::List { dashboard_id, page } => {
            let capabilities = ctx.capabilities(&session, dashboard_id).await?;
            let mut view = InviteRecordsView::new(ctx.api.clone(), session, dashboard_id, capabilities);
            ensure_loaded(view.load().await, view.list())?;
            view.list_mut().go_to(page);
            print_page(view.list(), |inv| format!("{}\t{}", inv.id, inv.invitee.email));
        }
        InvitesSubcommand::Send { dashboard_id, email } => {
            let capabilities = ctx.capabilities(&session, dashboard_id).await?;
            let mut view = InviteRecordsView::new(ctx.api.clone(), session, dashboard_id, capabilities);
            ensure_loaded(view.load().await, view.list())?;
            view.invite(&email).await?;
            settle(view.list_mut()).await;
            println!("invited {email} ({} pending)", view.list().items().len());
        }
        InvitesSubcommand::Cancel { dashboard_id, invitation_id } => {
            let capabilities = ctx.capabilities(&session, dashboard_id).await?;
            let mut view = InviteRecordsView::new(ctx.api.clone(), session, dashboard_id, capabilities);
            ensure_loaded(view.load().await, view.list())?;
            view.cancel(invitation_id).await?;
            settle(view.list_mut()).await;
            println!("cancelled invitation {invitation_id} ({} pending)", view.list().items().len());
        }
        InvitesSubcommand::Received => {
            let mut view = ReceivedInvitationsView::new(ctx.api.clone(), session);
            ensure_loaded(view.load().await, view.list())?;
            print_page(view.list(), |inv| {
                let dashboard = inv.dashboard.as_ref().map_or("", |d| d.title.as_str());
                let inviter = inv.inviter.as_ref().map_or("", |p| p.nickname.as_str());
                format!("{}\t{dashboard}\t{inviter}", inv.id)
            });
        }
        InvitesSubcommand::Respond { invitation_id, accept, decline } => {
            let mut view = ReceivedInvitationsView::new(ctx.api.clone(), session);
            ensure_loaded(view.load().await, view.list())?;
            let accept = accept && !decline;
            view.respond(invitation_id, accept).await?;
            settle(view.list_mut()).await;
            println!("{} invitation {invitation_id}", if accept { "accepted" } else { "declined" });
        }
    }
    Ok(())
}

async fn run_members(ctx: &CliContext, command: MembersSubcommand) -> Result<(), CliError> {
    let session = ctx.session_with_user().await?;
    match command {
        MembersSubcommand::List { dashboard_id, page } => {
            let mut view = MembersView::new(ctx.api.clone(), session, dashboard_id);
            ensure_loaded(view.load().await, view.list())?;
            view.list_mut().go_to(page);
            print_page(view.list(), |m| {
                let owner = if m.is_owner { " (owner)" } else { "" };
                format!("{}\t{}\t{}{owner}", m.id, m.display_name(), m.email)
            });
        }
        MembersSubcommand::Remove { dashboard_id, member_id } => {
            let mut view = MembersView::new(ctx.api.clone(), session, dashboard_id);
            ensure_loaded(view.load().await, view.list())?;
            view.remove(member_id).await?;
            settle(view.list_mut()).await;
            println!("removed member {member_id}");
        }
    }
    Ok(())
}

async fn run_columns(ctx: &CliContext, command: ColumnsSubcommand) -> Result<(), CliError> {
    let session = ctx.session_with_user().await?;
    let dashboard_id = match &command {
        ColumnsSubcommand::List { dashboard_id }
        | ColumnsSubcommand::Create { dashboard_id, .. }
        | ColumnsSubcommand::Rename { dashboard_id, .. }
        | ColumnsSubcommand::Delete { dashboard_id, .. } => *dashboard_id,
    };
    let capabilities = ctx.capabilities(&session, dashboard_id).await?;
    let mut view = BoardView::new(ctx.api.clone(), session, dashboard_id, capabilities);
    ensure_loaded(view.load().await, view.list())?;
    match command {
        ColumnsSubcommand::List { .. } => print_page(view.list(), |c| format!("{}\t{}", c.id, c.title)),
        ColumnsSubcommand::Create { title, .. } => {
            view.create(&title).await?;
            settle(view.list_mut()).await;
            println!("created column {title}");
        }
        ColumnsSubcommand::Rename { column_id, title, .. } => {
            view.rename(column_id, &title).await?;
            settle(view.list_mut()).await;
            println!("renamed column {column_id}");
        }
        ColumnsSubcommand::Delete { column_id, .. } => {
            view.delete(column_id).await?;
            settle(view.list_mut()).await;
            println!("deleted column {column_id}");
        }
    }
    Ok(())
}

async fn column_view(ctx: &CliContext, session: Session, dashboard_id: EntityId, column_id: EntityId) -> Result<ColumnView, CliError> {
    let capabilities = ctx.capabilities(&session, dashboard_id).await?;
    let mut board = BoardView::new(ctx.api.clone(), session.clone(), dashboard_id, capabilities);
    ensure_loaded(board.load().await, board.list())?;
    let column = board
        .list()
        .state()
        .get(column_id)
        .ok_or(CliError::NotFound { kind: "column", id: column_id })?;
    let mut view = ColumnView::new(ctx.api.clone(), session, dashboard_id, column, board.capabilities());
    ensure_loaded(view.load().await, view.list())?;
    Ok(view)
}

async fn run_cards(ctx: &CliContext, command: CardsSubcommand) -> Result<(), CliError> {
    let session = ctx.session_with_user().await?;
    match command {
        CardsSubcommand::List { dashboard_id, column_id } => {
            let view = column_view(ctx, session, dashboard_id, column_id).await?;
            println!("{} ({})", view.title(), view.count());
            print_page(view.list(), |c| {
                let due = c.due_date.as_deref().unwrap_or("-");
                let assignee = c.assignee.as_ref().map_or("-", |a| a.nickname.as_str());
                format!("{}\t{due}\t{assignee}\t{}\t[{}]", c.id, c.title, c.tags.join(", "))
            });
        }
        CardsSubcommand::Create { dashboard_id, column_id, card } => {
            let mut members = MembersView::new(ctx.api.clone(), session.clone(), dashboard_id);
            ensure_loaded(members.load().await, members.list())?;
            let mut view = column_view(ctx, session, dashboard_id, column_id).await?;
            let image_url = match card.image {
                Some(path) => Some(upload_image(&view, path).await?),
                None => None,
            };
            let draft = CardDraft {
                assignee: card.assignee,
                title: card.title,
                description: card.description,
                deadline: card.deadline,
                tags: card.tags.iter().collect(),
                image_url,
            };
            let message = view.create_card(&draft, &members.members()).await?;
            settle(view.list_mut()).await;
            println!("{message} ({} cards)", view.count());
        }
        CardsSubcommand::Delete { dashboard_id, column_id, card_id } => {
            let mut view = column_view(ctx, session, dashboard_id, column_id).await?;
            let message = view.delete_card(card_id).await?;
            settle(view.list_mut()).await;
            println!("{message} ({} left)", view.count());
        }
    }
    Ok(())
}

async fn run_comments(ctx: &CliContext, command: CommentsSubcommand) -> Result<(), CliError> {
    let session = ctx.session_with_user().await?;
    let card_id = match &command {
        CommentsSubcommand::List { card_id } | CommentsSubcommand::Add { card_id, .. } => *card_id,
    };
    let card = ctx.api.card(&session, card_id).await?;
    let mut view = CommentsView::new(ctx.api.clone(), session, &card);
    ensure_loaded(view.load().await, view.list())?;
    match command {
        CommentsSubcommand::List { .. } => print_page(view.list(), |c| {
            let author = c.author.as_ref().map_or("-", |a| a.nickname.as_str());
            format!("{}\t{author}\t{}", c.id, c.content)
        }),
        CommentsSubcommand::Add { content, .. } => {
            view.add(&content).await?;
            settle(view.list_mut()).await;
            println!("comment added to card {card_id}");
        }
    }
    Ok(())
}

async fn upload_image(view: &ColumnView, path: PathBuf) -> Result<String, CliError> {
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(source) => return Err(CliError::Image { path, source }),
    };
    let file_name = path
        .file_name()
        .map_or_else(|| "image".to_owned(), |name| name.to_string_lossy().into_owned());
    Ok(view.upload_image(&file_name, bytes).await?)
}

/// Wait for the reload a write schedules; the process exits right after.
async fn settle<S: ListSource>(view: &mut ListView<S>) {
    if view.settle_revalidation().await {
        debug!(items = view.items().len(), "list revalidated");
    }
}

fn ensure_loaded<S: ListSource>(phase: ListPhase, view: &ListView<S>) -> Result<(), CliError> {
    if phase == ListPhase::LoadError {
        let message = view.state().error().unwrap_or(taskify::messages::GENERIC_FAILURE);
        return Err(CliError::Load(message.to_owned()));
    }
    Ok(())
}

fn print_page<S: ListSource>(view: &ListView<S>, line: impl Fn(&S::Item) -> String) {
    if view.items().is_empty() {
        println!("(empty)");
        return;
    }
    for item in view.visible() {
        println!("{}", line(item));
    }
    let control = view.control();
    if control.visible {
        let prev = if control.prev_disabled { "" } else { "  --page for previous" };
        let next = if control.next_disabled { "" } else { "  more on next page" };
        println!("page {}/{}{prev}{next}", control.page, control.total_pages);
    }
}
