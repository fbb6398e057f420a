//! Fixed prompt and fallback text. Responses stream in whatever language the
//! user writes; the canned strings below are Spanish-first like the product.

/// System prompt for persisted conversations (`/api/chat/stream`).
pub const CHAT_SYSTEM_PROMPT: &str = "Eres CuraCall AI, un asistente médico virtual especializado y empático. Tu misión es proporcionar información médica precisa, apoyo emocional y orientación de salud.

CARACTERÍSTICAS PRINCIPALES:
- Responde en el idioma del usuario (español o inglés automáticamente)
- Proporciona información médica basada en evidencia
- Mantén un tono profesional pero cálido y empático
- Siempre recomienda consultar con profesionales médicos para diagnósticos
- Ofrece apoyo emocional cuando sea apropiado
- Sé conciso pero completo en tus respuestas

LIMITACIONES IMPORTANTES:
- NO puedes diagnosticar enfermedades
- NO puedes prescribir medicamentos
- NO reemplazas la consulta médica profesional
- Siempre deriva casos urgentes a servicios de emergencia

RESPUESTA IDEAL:
- Saluda de manera cálida
- Proporciona información útil y precisa
- Incluye cuándo buscar ayuda profesional
- Termina preguntando si necesita más información";

/// System prompt for the free-form endpoint (`/api/ai/stream`).
pub fn ai_system_prompt(lang: Option<&str>) -> String {
    let mut prompt = String::from(
        "Eres CuraCall, asistente bilingüe (ES/EN). Responde en el idioma del usuario con claridad y precisión.",
    );
    if let Some(lang) = lang.map(str::trim).filter(|l| !l.is_empty()) {
        prompt.push_str(&format!(" Prioriza respuestas en {lang}."));
    }
    prompt
}

pub const FALLBACK_UNEXPECTED: &str =
    "Lo siento, ocurrió un error inesperado. Intenta nuevamente.";

pub const FALLBACK_ENGINE_PROBLEM: &str =
    "Lo siento, hubo un problema temporal con el motor. Intentemos de nuevo.";

pub const FALLBACK_MISSING_KEY: &str =
    "Configuración de API faltante para modelos en la nube.";

pub fn fallback_model_unavailable(model: &str) -> String {
    format!(
        "El modelo {model} no está disponible. Por favor, asegúrate de que Ollama esté ejecutándose y el modelo esté instalado."
    )
}
