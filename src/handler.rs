use std::collections::HashSet;
use std::sync::Arc;
use poise::serenity_prelude as serenity;
use crate::command::dispatcher::{Author, CommandDispatcher, Incoming, Outcome};
use crate::playback::ReplyTo;

pub struct Data {
    pub dispatcher: Arc<CommandDispatcher>,
}

/// Role names of the message author, looked up in the guild cache.
fn role_names(ctx: &serenity::Context, message: &serenity::Message) -> HashSet<String> {
    let (Some(guild_id), Some(member)) = (message.guild_id, message.member.as_ref()) else {
        return HashSet::new();
    };

    let Some(guild) = ctx.cache.guild(guild_id) else {
        tracing::debug!("Guild {} not cached, treating author as roleless", guild_id);
        return HashSet::new();
    };

    member.roles.iter()
        .filter_map(|id| guild.roles.get(id))
        .map(|role| role.name.clone())
        .collect()
}

pub async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, anyhow::Error>,
    data: &Data,
) -> Result<(), anyhow::Error> {
    match event {
        serenity::FullEvent::Ready { data_about_bot } => {
            tracing::info!("Ready: {}", data_about_bot.user.name);
        }

        serenity::FullEvent::VoiceStateUpdate { old: _, new } => {
            if new.user_id == ctx.cache.current_user().id && new.channel_id.is_none() {
                tracing::warn!("Dropped from voice; will reconnect on the next request");
            }
        }

        serenity::FullEvent::Message { new_message } => {
            if new_message.author.bot || new_message.author.id == ctx.cache.current_user().id {
                return Ok(());
            }

            let incoming = Incoming {
                text: new_message.content.clone(),
                author: Author {
                    id: new_message.author.id.get(),
                    name: new_message.author.display_name().to_string(),
                    roles: role_names(ctx, new_message),
                },
                guild: new_message.guild_id.map(|id| id.get()),
                reply_to: ReplyTo(new_message.channel_id.get()),
                embed_title: new_message.embeds.first().and_then(|embed| embed.title.clone()),
            };

            if let Outcome::Dropped(err) = data.dispatcher.dispatch(incoming) {
                tracing::error!("Command from {} was dropped: {}", new_message.author.name, err);
            }
        }
        _ => {}
    }
    Ok(())
}
