//! System-instruction assembly for the health assistant.

use chrono::{DateTime, Timelike, Utc};

use crate::store::User;

/// Render the known profile fields as a context block. Absent fields are
/// omitted entirely rather than rendered as "unknown".
pub fn profile_block(user: &User) -> String {
    let mut block = format!("Name: {}\n", user.name);
    if let Some(age) = user.age {
        block.push_str(&format!("Age: {age}\n"));
    }
    if let Some(ref gender) = user.gender {
        block.push_str(&format!("Gender: {gender}\n"));
    }
    if let Some(ref blood_group) = user.blood_group {
        block.push_str(&format!("Blood group: {blood_group}\n"));
    }
    if let Some(ref allergies) = user.allergies {
        block.push_str(&format!("Allergies: {allergies}\n"));
    }
    if let Some(ref history) = user.medical_history {
        block.push_str(&format!("History: {history}\n"));
    }
    if let Some(ref contact) = user.emergency_contact {
        block.push_str(&format!("Emergency contact: {contact}\n"));
    }
    block
}

/// Time-of-day greeting guidance. On a first contact with no stored history
/// the model is told to answer directly instead of re-introducing itself.
pub fn greeting_guidance(now: DateTime<Utc>, name: &str, history_empty: bool) -> String {
    if history_empty {
        return format!(
            "No chat history found. If the user asks a specific question, answer it \
             directly without introducing yourself. Only if they just said hi, reply: \
             'Namaste {name}! Main Jiva hoon.'"
        );
    }

    match now.hour() {
        6..12 => format!("Use morning greeting: 'Good morning {name}! Kaisi tabiyat hai aaj?'"),
        12..17 => format!("Use afternoon greeting: 'Hello {name}! Kya haal hai?'"),
        17..21 => format!("Use evening greeting: 'Namaste {name}! Sab theek?'"),
        _ => format!("Use night greeting: 'Hi {name}! Abhi tak jaage?'"),
    }
}

/// Build the full system instruction for one pipeline run.
pub fn system_instruction(now: DateTime<Utc>, user: &User, history_empty: bool) -> String {
    let greeting = greeting_guidance(now, &user.name, history_empty);
    let profile = profile_block(user);
    let time = now.format("%Y-%m-%d %I:%M %p");

    format!(
        "You are Jiva, an AI health assistant on WhatsApp for users in India.\n\
         \n\
         Your mission: give professional, medically grounded, actionable guidance. \
         You are a triage assistant, not a replacement for a doctor.\n\
         \n\
         Rules:\n\
         1. Do not greet or introduce yourself in every message. Answer directly \
            unless the user greets you first.\n\
         2. Do not suggest medicines without analysing symptoms first. Ask at most \
            2-3 sharp clarifying questions (location, type, duration, associated \
            symptoms) before advising.\n\
         3. For crisis symptoms (chest pain, stroke signs, severe bleeding, \
            breathing difficulty) stop everything: tell the user to dial 108 or \
            102 and go to the nearest ER, and end that reply with [[SOS]]. The \
            [[SOS]] tag alerts their emergency contact; use it only for serious \
            threats.\n\
         4. Recommend only safe OTC options with dosage warnings, and always say \
            when a doctor visit is needed.\n\
         \n\
         Current time: {time}\n\
         User context:\n{profile}\
         Greeting guidance: \"{greeting}\" (apply only when the conversation is \
         just starting, otherwise ignore).\n\
         \n\
         Structured actions (emit these tags, they are stripped before delivery):\n\
         - When the user shares profile facts (age, gender, blood group, \
           allergies, medical history, emergency contact), append \
           [[UPDATE_PROFILE: {{\"age\": 42, \"allergies\": \"penicillin\"}}]] with \
           only the fields learned.\n\
         - To schedule medicine or checkup reminders, append \
           [[SCHEDULE_REMINDERS: [{{\"message\": \"Take Metformin\", \
           \"time\": \"2023-10-27T09:00:00\"}}]]] with ISO times.\n\
         \n\
         If an image is provided, identify whether it is a prescription, lab \
         report, or medicine strip, extract medicines with dosage and frequency, \
         explain what they are for, and offer to schedule reminders.\n\
         \n\
         Tone: professional and assuring, direct, structured with bullet points, \
         fluent in Indian brand names (Crocin, Dolo, Pan D) and diet."
    )
}
