use teloxide::utils::html;

use crate::data::market::{CoinQuote, MarketSummary};
use crate::data::news::News;

/// Telegram allows 4096 characters; leave room for the rest of the post.
const MAX_NEWS_CONTENT_CHARS: usize = 3000;
const BULLISH_MARKET_CAP: f64 = 2.5e12;
const BRANDING: &str = "\u{1f4f1} مقدم من: بوت أخبار الكريبتو من إنفترون داو";

/// "$67,012.50"; values under one dollar keep six decimals.
pub fn format_usd(value: f64) -> String {
    let decimals = if value.abs() >= 1.0 || value == 0.0 { 2 } else { 6 };
    let raw = format!("{:.*}", decimals, value.abs());
    let (int_part, frac) = raw.split_once('.').unwrap_or((raw.as_str(), ""));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if value < 0.0 { "-" } else { "" };
    format!("{sign}${grouped}.{frac}")
}

/// "🟢 +1.25%" / "🔴 -0.40%"
pub fn format_change(change: f64) -> String {
    if change > 0.0 {
        format!("\u{1f7e2} +{change:.2}%")
    } else {
        format!("\u{1f534} {change:.2}%")
    }
}

pub fn price_board(quotes: &[CoinQuote]) -> String {
    let mut text = String::from("\u{1f4b0} <b>أسعار العملات الرقمية الآن:</b>\n\n");
    for q in quotes {
        text.push_str(&format!(
            "\u{1f539} <b>{}</b>\n   السعر: <code>{}</code>\n   التغيير (24 ساعة): {}\n\n",
            html::escape(&q.symbol),
            format_usd(q.price),
            format_change(q.change_24h)
        ));
    }
    text.push_str("\u{26a0}\u{fe0f} <b>ملاحظة</b>: هذه الأسعار تقريبية لأغراض العرض فقط.");
    text
}

pub fn hourly_update(quotes: &[CoinQuote]) -> String {
    let mut text = String::from("\u{1f4b0} <b>تحديث الأسعار التلقائي كل ساعة:</b>\n\n");
    for q in quotes {
        text.push_str(&format!(
            "{}: {} {}\n",
            html::escape(&q.symbol),
            format_usd(q.price),
            format_change(q.change_24h)
        ));
    }
    text.push_str("\n\u{26a0}\u{fe0f} <b>ملاحظة</b>: هذه الأسعار تقريبية لأغراض العرض فقط.");
    text
}

pub fn market_board(s: &MarketSummary) -> String {
    let sentiment = if s.total_market_cap > BULLISH_MARKET_CAP {
        "\u{1f4c8} <b>صاعد</b>"
    } else {
        "\u{1f4c9} <b>هابط</b>"
    };
    format!(
        "\u{1f4ca} <b>حالة سوق الكريبتو</b>\n\n\
         \u{1f4b0} <b>القيمة السوقية الإجمالية:</b>\n   <code>${:.2} تريليون</code>\n\n\
         \u{1f4c8} <b>حجم التداول (24 ساعة):</b>\n   <code>${:.1} مليار</code>\n\n\
         \u{1f536} <b>هيمنة بيتكوين:</b>\n   <code>{:.1}%</code>\n\n\
         \u{1f537} <b>هيمنة إيثريوم:</b>\n   <code>{:.1}%</code>\n\n\
         \u{1f4dd} <b>اتجاه السوق:</b>\n   {}\n\n\
         \u{26a0}\u{fe0f} <b>ملاحظة</b>: البيانات محدثة من قاعدة البيانات ويتم تحديثها كل بضع دقائق.",
        s.total_market_cap / 1e12,
        s.total_volume / 1e9,
        s.btc_dominance,
        s.eth_dominance,
        sentiment
    )
}

/// Plain-text news post. `btc_change` is the cached 24h BTC change and
/// drives the market line on crypto news.
pub fn format_news(news: &News, btc_change: Option<f64>) -> String {
    let mut text = format!("{} {}\n\n", news.headline_emoji(), news.title);

    if !news.content.is_empty() {
        if news.content.chars().count() > MAX_NEWS_CONTENT_CHARS {
            let cut: String = news.content.chars().take(MAX_NEWS_CONTENT_CHARS).collect();
            text.push_str(&format!("{cut}...\n\n"));
        } else {
            text.push_str(&format!("{}\n\n", news.content));
        }
    }
    if !news.source.is_empty() {
        text.push_str(&format!("\u{1f4ca} المصدر: {}\n", news.source));
    }
    if !news.url.is_empty() {
        text.push_str(&format!("\u{1f517} الرابط: {}\n", news.url));
    }

    let hashtags: Vec<String> = news
        .tags
        .iter()
        .map(|t| t.trim().trim_start_matches('#').split_whitespace().collect::<Vec<_>>().join("_"))
        .filter(|t| !t.is_empty())
        .map(|t| format!("#{t}"))
        .collect();
    if !hashtags.is_empty() {
        text.push_str(&format!("\n{}\n", hashtags.join(" ")));
    }

    if let (true, Some(change)) = (news.is_crypto(), btc_change) {
        let trend = if change >= 0.0 {
            "\u{1f7e2} السوق: صاعد"
        } else {
            "\u{1f534} السوق: هابط"
        };
        text.push_str(&format!("\n{trend}"));
    }

    text.push_str("\n\n");
    text.push_str(BRANDING);
    text
}

const COMMAND_LIST: &str = "الأوامر المتاحة:\n\
     /start - عرض هذه الرسالة\n\
     /help - عرض معلومات المساعدة\n\
     /about - معلومات عن البوت\n\
     /price - عرض أسعار العملات الرقمية\n\
     /market - عرض معلومات سوق الكريبتو\n";

pub fn welcome_message(is_private: bool) -> String {
    let mut text = format!(
        "\u{1f44b} أهلاً! مرحباً بك في بوت أخبار الكريبتو من إنفترون داو.\n\n\
         سأقوم بنشر أخبار الكريبتو تلقائياً في هذه المحادثة.\n\n{COMMAND_LIST}"
    );
    if is_private {
        text.push_str("\nأضفني إلى مجموعة لنشر الأخبار هناك!\nتأكد من منحي صلاحيات إرسال الرسائل.");
    }
    text
}

pub fn group_welcome() -> String {
    format!(
        "\u{1f44b} أهلاً! تم إضافة بوت أخبار الكريبتو إلى هذه المجموعة.\n\n\
         سأقوم بنشر أخبار الكريبتو تلقائياً هنا.\n\n{COMMAND_LIST}"
    )
}

pub fn help_message() -> &'static str {
    "\u{1f4e2} <b>مساعدة بوت أخبار الكريبتو - مقدم من إنفترون داو</b>\n\n\
     هذا البوت مصمم لنشر أخبار العملات الرقمية تلقائياً داخل مجموعات تيليجرام، مع تحديث الأسعار لحظة بلحظة.\n\n\
     الأوامر المتاحة:\n\
     /start - بدء استخدام البوت\n\
     /help - عرض رسالة المساعدة\n\
     /about - معلومات عن البوت\n\
     /status - التحقق من حالة البوت\n\
     /price - عرض أحدث أسعار العملات الرقمية\n\
     /market - عرض معلومات سوق الكريبتو\n\
     /feedback - إرسال ملاحظات أو اقتراحات\n\n\
     \u{1f4a1} <b>نصائح الاستخدام:</b>\n\
     \u{2022} أضف البوت إلى مجموعتك ليصلك كل جديد في عالم الكريبتو\n\
     \u{2022} استخدم /price في أي وقت لمتابعة أسعار العملات الرقمية مباشرة\n\n\
     \u{1f517} <b>انضم إلى مجتمعنا العربي:</b>\n\
     https://t.me/+CMoM9cPlV5syNGE0\n\
     إنفترون داو - نبحث عن الجواهر ونموّلها"
}

pub fn about_message() -> &'static str {
    "\u{1f48e} <b>بوت أخبار الكريبتو - من تطوير وإنفاذ إنفترون داو</b> \u{1f48e}\n\n\
     تم تصميم هذا البوت ليكون امتداداً لرؤية إنفترون داو في تمكين المجتمعات الرقمية من الوصول إلى أحدث أخبار العملات الرقمية والأسواق المالية بكل سهولة داخل مجموعات تيليجرام.\n\n\
     \u{2728} <b>مميزات البوت:</b>\n\
     \u{2705} نشر أخبار العملات الرقمية بشكل تلقائي من مصادر موثوقة\n\
     \u{2705} عرض أسعار العملات الرقمية محدثة باستمرار\n\
     \u{2705} تحديث تلقائي للأسعار كل ساعة\n\
     \u{2705} دعم كامل للغة العربية\n\n\
     \u{1f680} <b>العملات المدعومة:</b>\n\
     \u{2022} بيتكوين (BTC)\n\
     \u{2022} إيثريوم (ETH)\n\
     \u{2022} سولانا (SOL)\n\
     \u{2022} بينانس كوين (BNB)\n\
     \u{2022} كاردانو (ADA)\n\
     ... وأكثر من ذلك\n\n\
     \u{1f4f1} هذا البوت مقدم حصرياً من: <b>إنفترون داو</b> \"نبحث عن الجواهر... ونموّلها\""
}

pub fn status_message(last_market_update: Option<&str>) -> String {
    let mut text = String::from("\u{2705} بوت أخبار الكريبتو يعمل بنجاح!");
    if let Some(ts) = last_market_update {
        // "2026-10-15T14:05:00.123+00:00" -> "2026-10-15 14:05 UTC"
        let short = match (ts.get(..10), ts.get(11..16)) {
            (Some(date), Some(time)) => format!("{date} {time} UTC"),
            _ => ts.to_string(),
        };
        text.push_str(&format!("\n\u{1f552} آخر تحديث لبيانات السوق: {short}"));
    }
    text
}

pub fn no_price_data() -> &'static str {
    "\u{26a0}\u{fe0f} عذراً، لا توجد بيانات أسعار متاحة حالياً."
}

pub fn no_market_data() -> &'static str {
    "\u{26a0}\u{fe0f} عذراً، لا توجد بيانات سوق متاحة حالياً."
}

pub fn feedback_thanks() -> &'static str {
    "\u{1f44d} شكراً لك على ملاحظاتك! تم استلامها وسيتم النظر فيها."
}

pub fn feedback_usage() -> &'static str {
    "\u{1f504} <b>إرسال ملاحظات أو اقتراحات</b>\n\n\
     لإرسال ملاحظاتك، استخدم الأمر على الشكل التالي:\n\n\
     <code>/feedback أحب الأخبار التي يوفرها البوت، لكن أتمنى أن تكون هناك تنبيهات للأسعار</code>\n\n\
     نحن نقدر ملاحظاتك ونسعى لتحسين البوت باستمرار!"
}

pub fn private_text_reply() -> &'static str {
    "\u{1f680} شكراً لرسالتك! إذا كنت بحاجة إلى مساعدة، استخدم /help."
}

pub fn not_authorized() -> &'static str {
    "\u{26d4} هذا الأمر متاح للمشرف فقط."
}

pub fn stats_message(chats: i64, deliveries_24h: i64) -> String {
    format!(
        "\u{1f4ca} <b>إحصائيات البوت</b>\n\n\
         المحادثات المسجلة: {chats}\n\
         الرسائل المرسلة (24 ساعة): {deliveries_24h}"
    )
}

pub fn fetch_failed_notice(what: &str, error: &str) -> String {
    format!("\u{26a0}\u{fe0f} {what} failed\n{error}")
}
