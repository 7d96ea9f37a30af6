//! Demo bot: a few commands, an inline menu and a login dialog.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use tgd_core::{
    domain::ChatId,
    event::{CallbackQuery, Message},
    ports::{InlineButton, Messenger},
    Dispatcher, Event, Guard, Handler, Result, Sequence, Update,
};

const HELP: &str = "Commands:\n\
/start - greeting\n\
/help - this text\n\
/menu - pick an option\n\
/login - sign in (send /cancel to abort)";

/// Register every demo route on `dispatcher`.
pub fn install(dispatcher: &Dispatcher, tx: Arc<dyn Messenger>) -> Result<()> {
    dispatcher.register_command::<Message>("/start", on_start(tx.clone()));
    dispatcher.register_command::<Message>("/help", reply_with(tx.clone(), HELP));
    dispatcher.register_command::<Message>("/menu", on_menu(tx.clone()));
    dispatcher.register_command::<Message>("/login", on_login(dispatcher.clone(), tx.clone()));
    dispatcher.register_pattern::<CallbackQuery>(r"^menu:\d+$", on_menu_choice(tx.clone()))?;
    // Any other slash command.
    dispatcher.register_pattern::<Message>(
        r"^/",
        reply_with(tx.clone(), "Unknown command, try /help"),
    )?;
    dispatcher.register_fallback(on_anything(tx));
    Ok(())
}

async fn reply(tx: &dyn Messenger, chat_id: ChatId, text: &str) {
    if let Err(e) = tx.send_text(chat_id, text).await {
        warn!(chat_id = chat_id.0, error = %e, "reply failed");
    }
}

fn reply_with(tx: Arc<dyn Messenger>, text: &'static str) -> Handler<Message> {
    Handler::new(move |m: Message| {
        let tx = tx.clone();
        async move { reply(tx.as_ref(), m.chat.id, text).await }
    })
}

fn on_start(tx: Arc<dyn Messenger>) -> Handler<Message> {
    Handler::new(move |m: Message| {
        let tx = tx.clone();
        async move {
            let name = m
                .from
                .as_ref()
                .map(|u| u.first_name.as_str())
                .unwrap_or("there");
            let text = format!("Hello, {name}! Send /help to see what I can do.");
            reply(tx.as_ref(), m.chat.id, &text).await;
        }
    })
}

fn on_menu(tx: Arc<dyn Messenger>) -> Handler<Message> {
    Handler::new(move |m: Message| {
        let tx = tx.clone();
        async move {
            let buttons: Vec<_> = (1..=3)
                .map(|n| InlineButton::new(format!("Option {n}"), format!("menu:{n}")))
                .collect();
            if let Err(e) = tx
                .send_inline_keyboard(m.chat.id, "Pick one:", &buttons)
                .await
            {
                warn!(chat_id = m.chat.id.0, error = %e, "menu failed");
            }
        }
    })
}

fn on_menu_choice(tx: Arc<dyn Messenger>) -> Handler<CallbackQuery> {
    Handler::new(move |q: CallbackQuery| {
        let tx = tx.clone();
        async move {
            let choice = q
                .data
                .as_deref()
                .and_then(|d| d.strip_prefix("menu:"))
                .unwrap_or("?");
            let text = format!("You picked option {choice}");
            if let Err(e) = tx.answer_callback_query(&q.id, Some(&text)).await {
                warn!(callback_id = %q.id, error = %e, "answer failed");
            }
            if let Some(msg) = &q.message {
                reply(tx.as_ref(), msg.chat.id, &text).await;
            }
        }
    })
}

fn on_login(dispatcher: Dispatcher, tx: Arc<dyn Messenger>) -> Handler<Message> {
    Handler::new(move |m: Message| {
        let dispatcher = dispatcher.clone();
        let tx = tx.clone();
        async move {
            let Some(user) = m.from.as_ref() else {
                return;
            };
            dispatcher.start_conversation(user.id, login_sequence(tx.clone()));
            reply(tx.as_ref(), m.chat.id, "Username?").await;
        }
    })
}

fn text_of(m: &Message) -> &str {
    m.text.as_deref().unwrap_or_default().trim()
}

fn is_cancel(m: &Message) -> bool {
    text_of(m) == "/cancel"
}

fn is_pin(m: &Message) -> bool {
    let t = text_of(m);
    t.len() == 4 && t.chars().all(|c| c.is_ascii_digit())
}

/// Two steps: username, then a four digit PIN. Non-PIN input keeps asking.
/// `/cancel` at any point ends the dialog.
pub fn login_sequence(tx: Arc<dyn Messenger>) -> Sequence<Message> {
    let username = Arc::new(Mutex::new(String::new()));

    let ask_pin = {
        let tx = tx.clone();
        let username = username.clone();
        Handler::new(move |m: Message| {
            let tx = tx.clone();
            let username = username.clone();
            async move {
                {
                    let mut slot = username.lock().unwrap_or_else(PoisonError::into_inner);
                    *slot = text_of(&m).to_string();
                }
                reply(tx.as_ref(), m.chat.id, "PIN (4 digits)?").await;
            }
        })
    };

    let check_pin = Handler::sync(|m: Message| {
        debug!(chat_id = m.chat.id.0, "pin accepted");
    });

    let welcome = {
        let tx = tx.clone();
        Handler::new(move |m: Message| {
            let tx = tx.clone();
            let username = username.clone();
            async move {
                let name = username.lock().unwrap_or_else(PoisonError::into_inner).clone();
                reply(tx.as_ref(), m.chat.id, &format!("Logged in as {name}.")).await;
            }
        })
    };

    let mut seq = Sequence::new()
        .guarded_step(ask_pin, Guard::new(|m: &Message| !text_of(m).is_empty()))
        // Let /cancel past the step guard so the common guard can veto it.
        .guarded_step(check_pin, Guard::new(|m: &Message| is_pin(m) || is_cancel(m)));
    seq.set_common_check(Guard::new(|m: &Message| !is_cancel(m)));
    seq.set_on_veto(reply_with(tx, "Login cancelled."));
    seq.set_on_exit(welcome);
    seq
}

fn on_anything(tx: Arc<dyn Messenger>) -> Handler<Update> {
    Handler::new(move |u: Update| {
        let tx = tx.clone();
        async move {
            match u.event {
                Event::Message(m) => {
                    if let Some(text) = m.text.as_deref() {
                        reply(tx.as_ref(), m.chat.id, text).await;
                    }
                }
                other => {
                    debug!(update_id = u.id, category = %other.category(), "unhandled update")
                }
            }
        }
    })
}
